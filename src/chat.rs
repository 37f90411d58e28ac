//! Chat turn orchestration.
//!
//! [`ChatService`] owns the single externally-invoked "turn" operation:
//! resolve (or create) the conversation, persist the user message, generate a
//! reply, persist the bot message, return the final aggregate.
//!
//! Failure semantics: if the user-message append fails the turn fails before
//! generation; if the bot-message append fails afterwards the user message
//! stays persisted (at-least-the-user-turn, no rollback).  Generator failures
//! and timeouts never fail the turn — they are downgraded to
//! [`FALLBACK_REPLY`] so a chat turn always returns a conversation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::db::sqlite::SqliteStore;
use crate::db::{
    CatalogStore, Conversation, ConversationStore, Message, MessageDraft, Product, Sender,
};
use crate::error::{validate_id, ServerError};
use crate::generator::{BotReply, ResponseGenerator, FALLBACK_REPLY};

/// Reply when a requested catalog read matches nothing.
const NO_MATCHES_REPLY: &str =
    "We don't have any products matching that criteria currently.";

/// Reply when the catalog read itself fails mid-turn.
const CATALOG_ERROR_REPLY: &str =
    "I encountered an error processing your request. Please try again.";

/// Orchestrates one user turn against the store and the generator.
pub struct ChatService {
    store: Arc<SqliteStore>,
    generator: Arc<dyn ResponseGenerator>,
    generator_timeout: Duration,
}

impl ChatService {
    pub fn new(
        store: Arc<SqliteStore>,
        generator: Arc<dyn ResponseGenerator>,
        generator_timeout: Duration,
    ) -> Self {
        Self {
            store,
            generator,
            generator_timeout,
        }
    }

    /// Handle one turn: append the user message, generate and append the bot
    /// reply, and return the conversation as it stands after both appends.
    pub async fn send_message(
        &self,
        user_id: &str,
        text: &str,
        conversation_id: Option<&str>,
    ) -> Result<Conversation, ServerError> {
        validate_id(user_id, "user ID")?;

        let conversation = match conversation_id {
            Some(id) => {
                validate_id(id, "conversation ID")?;
                self.store
                    .get_conversation(id)
                    .await?
                    .ok_or_else(|| ServerError::NotFound("conversation not found".into()))?
            }
            None => self.store.create_conversation(user_id).await?,
        };

        let conversation = self
            .store
            .append_message(&conversation.id, MessageDraft::new(text, Sender::User))
            .await?;

        // The history handed to the generator includes the user turn just
        // appended.
        let reply = self.generate_reply(text, &conversation.messages).await;

        let conversation = self
            .store
            .append_message(&conversation.id, MessageDraft::new(reply, Sender::Bot))
            .await?;

        Ok(conversation)
    }

    /// Run the generator under the configured timeout and resolve the tagged
    /// reply to final text.  Infallible: every failure path has a fixed
    /// user-facing string.
    async fn generate_reply(&self, text: &str, history: &[Message]) -> String {
        let generated = match tokio::time::timeout(
            self.generator_timeout,
            self.generator.generate(text, history),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(error = %e, "response generation failed; using fallback reply");
                return FALLBACK_REPLY.to_owned();
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.generator_timeout.as_millis() as u64,
                    "response generation timed out; using fallback reply"
                );
                return FALLBACK_REPLY.to_owned();
            }
        };

        match generated {
            BotReply::Plain(reply) => reply,
            BotReply::CatalogQuery(query) => {
                info!(category = ?query.category, limit = query.limit, "running catalog query");
                match self
                    .store
                    .top_products(query.category.as_deref(), query.limit)
                    .await
                {
                    Ok(products) => render_products(&products),
                    Err(e) => {
                        error!(error = %e, "catalog query failed");
                        CATALOG_ERROR_REPLY.to_owned()
                    }
                }
            }
        }
    }
}

/// Numbered summary of catalog results.
fn render_products(products: &[Product]) -> String {
    if products.is_empty() {
        return NO_MATCHES_REPLY.to_owned();
    }
    let mut reply = String::from("Here are our top products:\n");
    for (i, product) in products.iter().enumerate() {
        reply.push_str(&format!(
            "{}. {} - ${} (Category: {})\n",
            i + 1,
            product.name,
            product.price,
            product.category
        ));
    }
    reply.push_str("\nWould you like more information about any of these?");
    reply
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use crate::generator::rules::RuleBasedGenerator;
    use crate::generator::{CatalogQuery, GeneratorError};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct StubGenerator(BotReply);

    #[async_trait]
    impl ResponseGenerator for StubGenerator {
        async fn generate(
            &self,
            _text: &str,
            _history: &[Message],
        ) -> Result<BotReply, GeneratorError> {
            Ok(self.0.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl ResponseGenerator for FailingGenerator {
        async fn generate(
            &self,
            _text: &str,
            _history: &[Message],
        ) -> Result<BotReply, GeneratorError> {
            Err(GeneratorError::Upstream("boom".into()))
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl ResponseGenerator for SlowGenerator {
        async fn generate(
            &self,
            _text: &str,
            _history: &[Message],
        ) -> Result<BotReply, GeneratorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(BotReply::Plain("too late".into()))
        }
    }

    async fn service_with(generator: Arc<dyn ResponseGenerator>) -> (ChatService, Arc<SqliteStore>) {
        let store = Arc::new(
            SqliteStore::connect("sqlite::memory:")
                .await
                .expect("in-memory store"),
        );
        let service = ChatService::new(store.clone(), generator, Duration::from_millis(250));
        (service, store)
    }

    fn user_id() -> String {
        Uuid::new_v4().to_string()
    }

    #[tokio::test]
    async fn first_turn_creates_conversation_with_two_messages() {
        let (service, _) = service_with(Arc::new(RuleBasedGenerator)).await;
        let conv = service.send_message(&user_id(), "hi", None).await.unwrap();

        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].sender, Sender::User);
        assert_eq!(conv.messages[0].text, "hi");
        assert_eq!(conv.messages[1].sender, Sender::Bot);
        assert!(conv.messages[1].text.contains("Hello! Welcome"));
        assert!(conv.is_active);
    }

    #[tokio::test]
    async fn second_turn_appends_to_existing_conversation() {
        let (service, _) = service_with(Arc::new(RuleBasedGenerator)).await;
        let user = user_id();
        let conv = service.send_message(&user, "hi", None).await.unwrap();
        let conv = service
            .send_message(&user, "thank you", Some(&conv.id))
            .await
            .unwrap();

        assert_eq!(conv.messages.len(), 4);
        assert_eq!(conv.messages[2].text, "thank you");
        assert!(conv.messages[3].text.contains("You're welcome"));
    }

    #[tokio::test]
    async fn malformed_user_id_is_rejected_before_any_write() {
        let (service, store) = service_with(Arc::new(RuleBasedGenerator)).await;
        let err = service.send_message("bogus", "hi", None).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
        assert!(store.list_by_user("bogus").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_conversation_id_is_not_found() {
        let (service, _) = service_with(Arc::new(RuleBasedGenerator)).await;
        let err = service
            .send_message(&user_id(), "hi", Some(&Uuid::new_v4().to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn ended_conversation_rejects_new_turns() {
        let (service, store) = service_with(Arc::new(RuleBasedGenerator)).await;
        let user = user_id();
        let conv = service.send_message(&user, "hi", None).await.unwrap();
        store.end_conversation(&conv.id).await.unwrap();

        let err = service
            .send_message(&user, "hello again", Some(&conv.id))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[tokio::test]
    async fn generator_failure_becomes_fallback_reply() {
        let (service, _) = service_with(Arc::new(FailingGenerator)).await;
        let conv = service.send_message(&user_id(), "hi", None).await.unwrap();

        // The user turn persisted and the bot turn carries the apology.
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[1].text, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn generator_timeout_becomes_fallback_reply() {
        let (service, _) = service_with(Arc::new(SlowGenerator)).await;
        let conv = service.send_message(&user_id(), "hi", None).await.unwrap();
        assert_eq!(conv.messages[1].text, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn catalog_query_with_empty_catalog_reports_no_matches() {
        let generator = Arc::new(StubGenerator(BotReply::CatalogQuery(CatalogQuery {
            category: Some("Jeans".into()),
            limit: 5,
        })));
        let (service, _) = service_with(generator).await;
        let conv = service
            .send_message(&user_id(), "top jeans?", None)
            .await
            .unwrap();
        assert_eq!(conv.messages[1].text, NO_MATCHES_REPLY);
    }

    #[tokio::test]
    async fn catalog_query_renders_numbered_results() {
        let generator = Arc::new(StubGenerator(BotReply::CatalogQuery(CatalogQuery {
            category: Some("Jeans".into()),
            limit: 5,
        })));
        let (service, store) = service_with(generator).await;
        store
            .seed_product("Slim Fit Jeans", 59.99, "Jeans", 120)
            .await
            .unwrap();
        store
            .seed_product("Relaxed Jeans", 54.99, "Jeans", 80)
            .await
            .unwrap();

        let conv = service
            .send_message(&user_id(), "top jeans?", None)
            .await
            .unwrap();
        let reply = &conv.messages[1].text;
        assert!(reply.starts_with("Here are our top products:\n"));
        assert!(reply.contains("1. Slim Fit Jeans - $59.99 (Category: Jeans)"));
        assert!(reply.contains("2. Relaxed Jeans - $54.99 (Category: Jeans)"));
        assert!(reply.ends_with("Would you like more information about any of these?"));
    }
}
