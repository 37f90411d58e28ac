//! Hosted-LLM response generation.
//!
//! Calls an OpenAI-compatible chat-completions endpoint (Groq by default)
//! over HTTPS.  The conversation history is mapped to role/content pairs and
//! a fixed instruction preamble is prepended as the system message.
//!
//! The preamble teaches the model a constrained data-access protocol: instead
//! of inventing catalog facts, it may answer with the `<<QUERY_DB>>` marker
//! followed by a natural-language catalog query.  [`parse_reply`] turns such
//! output into [`BotReply::CatalogQuery`] exactly once, here, so the
//! orchestrator only ever sees a tagged variant and never scans reply text.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BotReply, CatalogQuery, GeneratorError, ResponseGenerator};
use crate::db::{Message, Sender};

/// Marker the model uses to request a data lookup.
const SENTINEL: &str = "<<QUERY_DB>>";

const DEFAULT_LIMIT: i64 = 5;

/// Reply when the model asks for an order-status lookup, which needs an
/// order number we don't have yet.
const ORDER_STATUS_REPLY: &str =
    "Please provide your order number so I can check the status.";

/// Reply when the sentinel query names nothing we can look up.
const CLARIFY_REPLY: &str =
    "I need more information to help with that request. Could you please clarify?";

const SYSTEM_PROMPT: &str = "\
You are an AI assistant for an e-commerce clothing store. Your role is to:
1. Ask clarifying questions when needed to understand customer requests
2. Query the database when appropriate (use <<QUERY_DB>> marker)
3. Provide helpful, accurate information about products

Guidelines:
- Be polite and professional
- Keep responses concise but informative
- For product inquiries, always verify availability
- For order status requests, ask for order number

Database Query Instructions:
When you need to query the database, respond with:
<<QUERY_DB>>[your natural language query]

Example:
User: \"What are your top jeans?\"
AI: \"<<QUERY_DB>>Get top 5 jeans sorted by sales count\"";

/// Chat-completions client.
pub struct LlmGenerator {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    model: String,
}

impl LlmGenerator {
    pub fn new(
        api_key: impl Into<String>,
        api_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            // The default client (no request timeout) is an acceptable
            // fallback: the orchestrator bounds the whole call anyway.
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            api_url: api_url.into(),
            model: model.into(),
        }
    }

    /// Map stored history to the wire format.  `history` already ends with
    /// the current user turn, so nothing is appended here.
    fn build_messages(history: &[Message]) -> Vec<WireMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(WireMessage {
            role: "system".into(),
            content: SYSTEM_PROMPT.into(),
        });
        for msg in history {
            messages.push(WireMessage {
                role: match msg.sender {
                    Sender::User => "user".into(),
                    Sender::Bot => "assistant".into(),
                },
                content: msg.text.clone(),
            });
        }
        messages
    }
}

#[async_trait]
impl ResponseGenerator for LlmGenerator {
    async fn generate(
        &self,
        _text: &str,
        history: &[Message],
    ) -> Result<BotReply, GeneratorError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::build_messages(history),
            temperature: 0.3,
            max_tokens: 1024,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeneratorError::Timeout
                } else {
                    GeneratorError::Upstream(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Upstream(format!(
                "status {status}: {body}"
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if content.is_empty() {
            return Err(GeneratorError::InvalidResponse("empty completion".into()));
        }

        debug!(model = %self.model, output_len = content.len(), "completion received");
        Ok(parse_reply(&content))
    }
}

/// Classify model output.  Replies without the sentinel pass through
/// verbatim.  For sentinel replies the query text after the marker picks the
/// branch: order-status lookups get the fixed ask-for-an-order-number reply,
/// product lookups become a [`BotReply::CatalogQuery`], and anything else
/// gets a clarification prompt.
fn parse_reply(content: &str) -> BotReply {
    let Some(idx) = content.find(SENTINEL) else {
        return BotReply::Plain(content.to_owned());
    };
    let query = content[idx + SENTINEL.len()..].trim();
    let lowered = query.to_lowercase();

    if lowered.contains("order status") {
        return BotReply::Plain(ORDER_STATUS_REPLY.to_owned());
    }
    if ["top", "best", "product", "jeans", "shirt"]
        .iter()
        .any(|w| lowered.contains(w))
    {
        return BotReply::CatalogQuery(CatalogQuery {
            category: extract_category(&lowered),
            limit: extract_limit(query),
        });
    }
    BotReply::Plain(CLARIFY_REPLY.to_owned())
}

/// Recognize literal result counts in the query text.  Checked in the fixed
/// order 3, 5, 10; anything else falls back to 5.  The model is expected to
/// phrase queries predictably per the instruction preamble, so this stays a
/// pattern match, not a parser.
fn extract_limit(query: &str) -> i64 {
    if query.contains('3') {
        3
    } else if query.contains('5') {
        5
    } else if query.contains("10") {
        10
    } else {
        DEFAULT_LIMIT
    }
}

/// Category vocabulary the model may reference.  Expects lowercased input.
fn extract_category(query: &str) -> Option<String> {
    if query.contains("jeans") {
        Some("Jeans".to_owned())
    } else if query.contains("shirt") {
        Some("T-Shirts".to_owned())
    } else {
        None
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

// ── Tests ──────────────────────────────────────────────────────────────────────
