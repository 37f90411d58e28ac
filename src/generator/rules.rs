//! Deterministic rule-based response generation.
//!
//! Substring matching over a lower-cased copy of the input against a fixed
//! ordered list of intents; the first matching rule wins.  No store access
//! and no I/O, so this path is fully deterministic and suitable for
//! exhaustive testing (and for running the server without an LLM API key).

use async_trait::async_trait;

use super::{BotReply, GeneratorError, ResponseGenerator};
use crate::db::Message;

/// Catalog slice rendered by the top-products rule.  Fixed in memory; the
/// rule-based path never touches the database.
const SAMPLE_PRODUCTS: &[(&str, f64)] = &[
    ("Premium Cotton T-Shirt", 29.99),
    ("Slim Fit Jeans", 59.99),
    ("Sports Hoodie", 49.99),
];

const GREETING_REPLY: &str =
    "Hello! Welcome to our e-commerce store. How can I help you today?";
const ORDER_STATUS_REPLY: &str =
    "You can check your order status in the 'My Orders' section of your account.";
const RETURNS_REPLY: &str =
    "We accept returns within 30 days of purchase. Please visit our Returns Center for more details.";
const THANKS_REPLY: &str = "You're welcome! Is there anything else I can help you with?";
const FALLBACK_INTENT_REPLY: &str =
    "I'm sorry, I didn't understand that. Could you please rephrase your question?";

/// Keyword-matching responder.
pub struct RuleBasedGenerator;

impl RuleBasedGenerator {
    fn reply_for(text: &str) -> String {
        let text = text.to_lowercase();

        if ["hello", "hi", "hey"].iter().any(|w| text.contains(w)) {
            return GREETING_REPLY.to_owned();
        }

        if text.contains("top product") || text.contains("best seller") {
            let mut reply = String::from("Our top selling products are:\n");
            for (i, (name, price)) in SAMPLE_PRODUCTS.iter().take(5).enumerate() {
                reply.push_str(&format!("{}. {} - ${}\n", i + 1, name, price));
            }
            return reply;
        }

        if text.contains("order status") {
            return ORDER_STATUS_REPLY.to_owned();
        }

        if text.contains("return") || text.contains("exchange") {
            return RETURNS_REPLY.to_owned();
        }

        if text.contains("thank") {
            return THANKS_REPLY.to_owned();
        }

        FALLBACK_INTENT_REPLY.to_owned()
    }
}

#[async_trait]
impl ResponseGenerator for RuleBasedGenerator {
    async fn generate(
        &self,
        text: &str,
        _history: &[Message],
    ) -> Result<BotReply, GeneratorError> {
        Ok(BotReply::Plain(Self::reply_for(text)))
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
