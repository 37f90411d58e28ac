//! SQLite implementation of [`ConversationStore`] and [`CatalogStore`].
//!
//! Uses [`sqlx`] with the `sqlite` feature.  Migrations are run automatically
//! on startup via [`SqliteStore::connect`].
//!
//! # Migrations path
//!
//! `sqlx::migrate!("./migrations")` resolves the path **at compile time**
//! relative to `CARGO_MANIFEST_DIR` (the crate root), so the directory is
//! embedded into the binary.  The database file location is determined at
//! runtime by the `CARTBOT_DATABASE_URL` environment variable and is **not**
//! related to the current working directory at runtime.
//!
//! # Queries
//!
//! The `sqlx::query` (runtime-verified) form is used deliberately so that no
//! `DATABASE_URL` environment variable is needed at compile time.
//!
//! # Atomicity
//!
//! `append_message` wraps the existence check, the message insert, and the
//! `updated_at` refresh in one transaction, so concurrent appends to the same
//! conversation interleave without lost updates and no partial state (message
//! without timestamp refresh, or vice versa) is ever observable.
//!
//! The transaction is opened with `BEGIN IMMEDIATE`: a deferred transaction
//! that reads first and writes later would need a lock upgrade, which SQLite
//! answers with an immediate `SQLITE_BUSY` instead of waiting on the busy
//! handler.  Taking the write lock up front makes concurrent appenders queue
//! rather than fail.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{
    CatalogStore, Conversation, ConversationStore, Message, MessageDraft, Product, Sender,
    StoreError,
};

/// SQLite-backed conversation / catalog store.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g.
    /// `"sqlite://cartbot.db?mode=rwc"` or `"sqlite::memory:"` for tests.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        // A pooled in-memory database would hand each connection its own
        // empty schema, so cap the pool at one connection for ":memory:".
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>, sqlx::Error> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT text, sender, timestamp, metadata \
             FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(text, sender, timestamp, metadata)| Message {
                text,
                sender: sender.parse().unwrap_or_else(|e| {
                    tracing::warn!(raw = %sender, error = %e, "unknown sender in messages table; treating as bot");
                    Sender::Bot
                }),
                timestamp: parse_timestamp(&timestamp, "messages.timestamp"),
                metadata: serde_json::from_str(&metadata).unwrap_or_else(|e| {
                    tracing::warn!(raw = %metadata, error = %e, "failed to parse message metadata; using empty object");
                    serde_json::Value::Object(serde_json::Map::new())
                }),
            })
            .collect())
    }

    async fn conversation_from_row(
        &self,
        row: (String, String, String, i64, String, String),
    ) -> Result<Conversation, sqlx::Error> {
        let (id, user_id, session_id, is_active, created_at, updated_at) = row;
        let messages = self.load_messages(&id).await?;
        Ok(Conversation {
            id,
            user_id,
            session_id,
            messages,
            is_active: is_active != 0,
            created_at: parse_timestamp(&created_at, "conversations.created_at"),
            updated_at: parse_timestamp(&updated_at, "conversations.updated_at"),
        })
    }
}

fn parse_timestamp(raw: &str, field: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        tracing::warn!(raw = %raw, field, error = %e, "failed to parse stored timestamp; using now");
        Utc::now()
    })
}

impl ConversationStore for SqliteStore {
    async fn create_conversation(&self, user_id: &str) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        // The UUID suffix keeps session ids unique even when two
        // conversations are created in the same microsecond.
        let session_id = format!("session_{}_{}", now.timestamp_micros(), id);
        sqlx::query(
            "INSERT INTO conversations (id, user_id, session_id, is_active, created_at, updated_at) \
             VALUES (?1, ?2, ?3, 1, ?4, ?4)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(&session_id)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(Conversation {
            id,
            user_id: user_id.to_owned(),
            session_id,
            messages: Vec::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let row: Option<(String, String, String, i64, String, String)> = sqlx::query_as(
            "SELECT id, user_id, session_id, is_active, created_at, updated_at \
             FROM conversations WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.conversation_from_row(row).await?)),
            None => Ok(None),
        }
    }

    async fn append_message(
        &self,
        id: &str,
        draft: MessageDraft,
    ) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let row: Option<(i64,)> =
            sqlx::query_as("SELECT is_active FROM conversations WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        match row {
            None => return Err(StoreError::NotFound),
            Some((0,)) => return Err(StoreError::Closed),
            Some(_) => {}
        }

        sqlx::query(
            "INSERT INTO messages (conversation_id, text, sender, timestamp, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(id)
        .bind(&draft.text)
        .bind(draft.sender.as_str())
        .bind(now.to_rfc3339())
        .bind(draft.metadata.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = ?1 WHERE id = ?2")
            .bind(now.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.get_conversation(id).await?.ok_or(StoreError::NotFound)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let rows: Vec<(String, String, String, i64, String, String)> = sqlx::query_as(
            "SELECT id, user_id, session_id, is_active, created_at, updated_at \
             FROM conversations WHERE user_id = ?1 ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            conversations.push(self.conversation_from_row(row).await?);
        }
        Ok(conversations)
    }

    async fn end_conversation(&self, id: &str) -> Result<Conversation, StoreError> {
        // The `is_active = 1` guard makes re-ending a no-op: zero rows match,
        // nothing is written, and the unchanged aggregate is returned.
        sqlx::query(
            "UPDATE conversations SET is_active = 0, updated_at = ?1 \
             WHERE id = ?2 AND is_active = 1",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_conversation(id).await?.ok_or(StoreError::NotFound)
    }
}

impl CatalogStore for SqliteStore {
    async fn top_products(
        &self,
        category: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Product>, StoreError> {
        let rows: Vec<(i64, String, f64, String, i64)> = if let Some(category) = category {
            sqlx::query_as(
                "SELECT id, name, price, category, sales_count \
                 FROM products WHERE category = ?1 ORDER BY sales_count DESC LIMIT ?2",
            )
            .bind(category)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                "SELECT id, name, price, category, sales_count \
                 FROM products ORDER BY sales_count DESC LIMIT ?1",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };
        Ok(rows
            .into_iter()
            .map(|(id, name, price, category, sales_count)| Product {
                id,
                name,
                price,
                category,
                sales_count,
            })
            .collect())
    }
}

#[cfg(test)]
impl SqliteStore {
    /// Test helper: insert a product row directly.
    pub(crate) async fn seed_product(
        &self,
        name: &str,
        price: f64,
        category: &str,
        sales_count: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO products (name, price, category, sales_count) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(name)
        .bind(price)
        .bind(category)
        .bind(sales_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    async fn mem_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:")
            .await
            .expect("in-memory store")
    }

    fn user_id() -> String {
        Uuid::new_v4().to_string()
    }

    #[tokio::test]
    async fn create_starts_empty_and_active() {
        let store = mem_store().await;
        let conv = store.create_conversation(&user_id()).await.unwrap();
        assert!(conv.messages.is_empty());
        assert!(conv.is_active);
        assert_eq!(conv.created_at, conv.updated_at);
        assert!(conv.session_id.starts_with("session_"));
    }

    #[tokio::test]
    async fn session_ids_are_unique_even_back_to_back() {
        // No pause between creations: two conversations minted in the same
        // microsecond must still get distinct session ids.
        let store = mem_store().await;
        let a = store.create_conversation(&user_id()).await.unwrap();
        let b = store.create_conversation(&user_id()).await.unwrap();
        assert_ne!(a.session_id, b.session_id);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = mem_store().await;
        let got = store
            .get_conversation(&Uuid::new_v4().to_string())
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn append_grows_messages_and_bumps_updated_at() {
        let store = mem_store().await;
        let conv = store.create_conversation(&user_id()).await.unwrap();
        let before = conv.updated_at;

        let draft = MessageDraft::new("hello", Sender::User);
        let conv = store.append_message(&conv.id, draft).await.unwrap();

        assert_eq!(conv.messages.len(), 1);
        let msg = &conv.messages[0];
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.sender, Sender::User);
        assert!(msg.metadata.as_object().is_some_and(|m| m.is_empty()));
        assert!(conv.updated_at >= before);
        // Timestamp is store-assigned at append time, not at creation.
        assert!(msg.timestamp >= conv.created_at);
    }

    #[tokio::test]
    async fn append_preserves_insertion_order() {
        let store = mem_store().await;
        let conv = store.create_conversation(&user_id()).await.unwrap();
        for text in ["one", "two", "three"] {
            store
                .append_message(&conv.id, MessageDraft::new(text, Sender::User))
                .await
                .unwrap();
        }
        let conv = store.get_conversation(&conv.id).await.unwrap().unwrap();
        let texts: Vec<&str> = conv.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn append_keeps_metadata() {
        let store = mem_store().await;
        let conv = store.create_conversation(&user_id()).await.unwrap();
        let mut draft = MessageDraft::new("query", Sender::User);
        draft.metadata = serde_json::json!({ "intent": "product_query" });
        let conv = store.append_message(&conv.id, draft).await.unwrap();
        assert_eq!(conv.messages[0].metadata["intent"], "product_query");
    }

    #[tokio::test]
    async fn append_to_missing_conversation_is_not_found() {
        let store = mem_store().await;
        let err = store
            .append_message(
                &Uuid::new_v4().to_string(),
                MessageDraft::new("hi", Sender::User),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn append_to_ended_conversation_is_rejected() {
        let store = mem_store().await;
        let conv = store.create_conversation(&user_id()).await.unwrap();
        store.end_conversation(&conv.id).await.unwrap();
        let err = store
            .append_message(&conv.id, MessageDraft::new("hi", Sender::User))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Closed));

        // Rejection left no partial state behind.
        let conv = store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert!(conv.messages.is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_all_succeed_and_persist() {
        // A file-backed database gives the pool real parallel connections
        // (":memory:" is capped at one), so the appenders actually contend
        // for the write lock instead of serializing in the pool.
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("cartbot.db").display()
        );
        let store = std::sync::Arc::new(SqliteStore::connect(&url).await.expect("file store"));
        let conv = store.create_conversation(&user_id()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let id = conv.id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_message(&id, MessageDraft::new(format!("turn {i}"), Sender::User))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let conv = store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(conv.messages.len(), 16);
    }

    #[tokio::test]
    async fn list_by_user_orders_most_recent_first() {
        let store = mem_store().await;
        let user = user_id();
        let oldest = store.create_conversation(&user).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let newer = store.create_conversation(&user).await.unwrap();

        let listed = store.list_by_user(&user).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);

        // Appending to the oldest conversation moves it to the front.
        tokio::time::sleep(Duration::from_millis(5)).await;
        store
            .append_message(&oldest.id, MessageDraft::new("hi", Sender::User))
            .await
            .unwrap();
        let listed = store.list_by_user(&user).await.unwrap();
        assert_eq!(listed[0].id, oldest.id);
    }

    #[tokio::test]
    async fn list_by_user_excludes_other_users() {
        let store = mem_store().await;
        let user = user_id();
        store.create_conversation(&user).await.unwrap();
        store.create_conversation(&user_id()).await.unwrap();
        assert_eq!(store.list_by_user(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn end_conversation_is_idempotent() {
        let store = mem_store().await;
        let conv = store.create_conversation(&user_id()).await.unwrap();

        let ended = store.end_conversation(&conv.id).await.unwrap();
        assert!(!ended.is_active);
        let ended_at = ended.updated_at;

        // Second end: no error, still inactive, nothing rewritten.
        let again = store.end_conversation(&conv.id).await.unwrap();
        assert!(!again.is_active);
        assert_eq!(again.updated_at, ended_at);
    }

    #[tokio::test]
    async fn end_missing_conversation_is_not_found() {
        let store = mem_store().await;
        let err = store
            .end_conversation(&Uuid::new_v4().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn top_products_sorts_filters_and_limits() {
        let store = mem_store().await;
        store.seed_product("Slim Fit Jeans", 59.99, "Jeans", 120).await.unwrap();
        store.seed_product("Relaxed Jeans", 54.99, "Jeans", 80).await.unwrap();
        store.seed_product("Sports Hoodie", 49.99, "Hoodies", 200).await.unwrap();

        let all = store.top_products(None, 5).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].name, "Sports Hoodie");

        let jeans = store.top_products(Some("Jeans"), 1).await.unwrap();
        assert_eq!(jeans.len(), 1);
        assert_eq!(jeans[0].name, "Slim Fit Jeans");
    }

    #[tokio::test]
    async fn top_products_empty_catalog() {
        let store = mem_store().await;
        assert!(store.top_products(None, 5).await.unwrap().is_empty());
    }
}
