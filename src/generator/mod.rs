//! Response generation.
//!
//! [`ResponseGenerator`] is the capability the chat orchestrator calls to turn
//! the latest user utterance (plus prior history) into a bot reply.  Two
//! implementations exist: a deterministic keyword matcher ([`rules`]) and a
//! hosted-LLM client ([`llm`]).  The trait is object-safe so the concrete
//! strategy can be chosen from configuration at startup.
//!
//! A generator never answers with a bare string: it returns [`BotReply`], a
//! tagged union, so the orchestrator dispatches on an explicit variant
//! instead of scanning reply text for markers.

pub mod llm;
pub mod rules;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::Message;

/// Fixed reply substituted whenever generation fails or times out.  Generator
/// failures are never surfaced to the HTTP caller; a chat turn always returns
/// a conversation.
pub const FALLBACK_REPLY: &str =
    "I'm having trouble processing your request. Please try again later.";

/// A structured catalog lookup requested by the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    /// Category filter, from a small fixed vocabulary (`"Jeans"`,
    /// `"T-Shirts"`); `None` means all categories.
    pub category: Option<String>,
    /// Result-count hint; defaults to 5.
    pub limit: i64,
}

/// What the generator wants the orchestrator to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotReply {
    /// Send this text to the user as-is.
    Plain(String),
    /// Run a catalog query and render the results.
    CatalogQuery(CatalogQuery),
}

/// Errors from response generation.  These stay inside the orchestrator,
/// which downgrades them to [`FALLBACK_REPLY`].
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generation timed out")]
    Timeout,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

/// Produce a reply for `text`, given the conversation history as it stands
/// after the user message was appended (so `history` already contains
/// `text` as its final user turn).
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, text: &str, history: &[Message])
        -> Result<BotReply, GeneratorError>;
}
