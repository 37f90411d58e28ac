//! Shared application state injected into every Axum handler.
//!
//! The store client and chat service are constructed once in `main` and
//! passed here explicitly — no module-global connection handles.

use std::sync::Arc;

use crate::chat::ChatService;
use crate::config::Config;
use crate::db::sqlite::SqliteStore;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Persistent conversation / catalog store.
    pub store: Arc<SqliteStore>,
    /// Turn orchestrator (store + response generator).
    pub chat: Arc<ChatService>,
}
