//! Database abstraction layer.
//!
//! [`ConversationStore`] defines the interface for persisting conversation
//! aggregates, [`CatalogStore`] for reading the product catalog.  The default
//! implementation of both is [`sqlite::SqliteStore`].  To swap to another
//! database (Postgres, MySQL, …), implement the traits for your new type and
//! change the concrete type in [`crate::state::AppState`].
//!
//! All trait methods use `impl Future` in their signatures (stable since Rust
//! 1.75) so no extra `async-trait` crate is required here.

pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    /// Stable string form used in the `messages.sender` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }
}

impl std::str::FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Sender::User),
            "bot" => Ok(Sender::Bot),
            other => Err(format!("unknown sender: {other}")),
        }
    }
}

/// One turn within a conversation.  Immutable once appended.
#[derive(Debug, Clone)]
pub struct Message {
    pub text: String,
    pub sender: Sender,
    /// Assigned by the store at append time, never by the caller.
    pub timestamp: DateTime<Utc>,
    /// Free-form JSON object; defaults to `{}`.
    pub metadata: serde_json::Value,
}

/// Caller-supplied message content; the store fills in the timestamp.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub text: String,
    pub sender: Sender,
    pub metadata: serde_json::Value,
}

impl MessageDraft {
    pub fn new(text: impl Into<String>, sender: Sender) -> Self {
        Self {
            text: text.into(),
            sender,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

/// The persisted aggregate of one user's chat session with the bot.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    /// Globally unique, derived from the creation instant.
    pub session_id: String,
    /// Insertion-ordered, append-only.
    pub messages: Vec<Message>,
    /// `true` at creation; set `false` exactly once by `end_conversation`.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row in the `products` table.
#[derive(Debug, Clone)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub category: String,
    pub sales_count: i64,
}

/// Errors surfaced by the store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced conversation does not exist.
    #[error("conversation not found")]
    NotFound,

    /// The conversation has been ended and no longer accepts messages.
    #[error("conversation has ended")]
    Closed,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Trait for persisting [`Conversation`] aggregates.
pub trait ConversationStore: Send + Sync + 'static {
    /// Create a conversation for `user_id` with no messages, `is_active =
    /// true`, and `created_at == updated_at`.
    fn create_conversation(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Conversation, StoreError>> + Send;

    /// Point lookup; `Ok(None)` when the id is well-formed but absent.
    fn get_conversation(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, StoreError>> + Send;

    /// Atomically append `draft` (timestamp assigned here) and refresh
    /// `updated_at`, returning the full updated aggregate.
    ///
    /// Fails with [`StoreError::NotFound`] for a missing conversation and
    /// [`StoreError::Closed`] for an ended one.
    fn append_message(
        &self,
        id: &str,
        draft: MessageDraft,
    ) -> impl std::future::Future<Output = Result<Conversation, StoreError>> + Send;

    /// All conversations for `user_id`, most recently active first.
    fn list_by_user(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, StoreError>> + Send;

    /// Set `is_active = false` and refresh `updated_at`.  Ending an already
    /// ended conversation is a no-op success.
    fn end_conversation(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Conversation, StoreError>> + Send;
}

/// Read access to the product catalog.
pub trait CatalogStore: Send + Sync + 'static {
    /// Best-selling products, optionally filtered by category.
    fn top_products(
        &self,
        category: Option<&str>,
        limit: i64,
    ) -> impl std::future::Future<Output = Result<Vec<Product>, StoreError>> + Send;
}
