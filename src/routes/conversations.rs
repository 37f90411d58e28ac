//! Conversation CRUD routes.
//!
//! These operate on the store directly (no generation involved): create,
//! point lookup, raw message append, per-user listing, and close.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::db::{ConversationStore, MessageDraft};
use crate::error::{validate_id, ServerError};
use crate::schemas::{AppendMessageRequest, ConversationResponse, CreateConversationRequest};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        start_conversation,
        read_conversation,
        add_message,
        list_user_conversations,
        close_conversation
    ),
    components(schemas(
        CreateConversationRequest,
        AppendMessageRequest,
        ConversationResponse,
        crate::schemas::MessageResponse,
        crate::db::Sender
    ))
)]
pub struct ConversationsApi;

/// Register conversation routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/conversations", post(start_conversation))
        .route("/conversations/{id}", get(read_conversation))
        .route("/conversations/{id}/messages", post(add_message))
        .route("/conversations/user/{user_id}", get(list_user_conversations))
        .route("/conversations/{id}/end", put(close_conversation))
}

/// Start a new conversation for a user (`POST /conversations`).
#[utoipa::path(
    post,
    path = "/conversations",
    tag = "conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 200, description = "Conversation created", body = ConversationResponse),
        (status = 400, description = "Invalid user ID"),
    )
)]
pub async fn start_conversation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<Json<ConversationResponse>, ServerError> {
    validate_id(&req.user_id, "user ID")?;
    let conversation = state.store.create_conversation(&req.user_id).await?;
    Ok(Json(conversation.to_response()))
}

/// Fetch one conversation (`GET /conversations/{id}`).
#[utoipa::path(
    get,
    path = "/conversations/{id}",
    tag = "conversations",
    responses(
        (status = 200, description = "Conversation found", body = ConversationResponse),
        (status = 400, description = "Invalid conversation ID"),
        (status = 404, description = "Conversation not found"),
    )
)]
pub async fn read_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, ServerError> {
    validate_id(&id, "conversation ID")?;
    let conversation = state
        .store
        .get_conversation(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound("conversation not found".into()))?;
    Ok(Json(conversation.to_response()))
}

/// Append a message without invoking generation
/// (`POST /conversations/{id}/messages`).
#[utoipa::path(
    post,
    path = "/conversations/{id}/messages",
    tag = "conversations",
    request_body = AppendMessageRequest,
    responses(
        (status = 200, description = "Message appended", body = ConversationResponse),
        (status = 400, description = "Invalid ID or conversation has ended"),
        (status = 404, description = "Conversation not found"),
    )
)]
pub async fn add_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AppendMessageRequest>,
) -> Result<Json<ConversationResponse>, ServerError> {
    validate_id(&id, "conversation ID")?;
    let draft = MessageDraft {
        text: req.text,
        sender: req.sender,
        metadata: req
            .metadata
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
    };
    let conversation = state.store.append_message(&id, draft).await?;
    Ok(Json(conversation.to_response()))
}

/// List a user's conversations, most recently active first
/// (`GET /conversations/user/{user_id}`).
#[utoipa::path(
    get,
    path = "/conversations/user/{user_id}",
    tag = "conversations",
    responses(
        (status = 200, description = "Conversations listed", body = Vec<ConversationResponse>),
        (status = 400, description = "Invalid user ID"),
    )
)]
pub async fn list_user_conversations(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ConversationResponse>>, ServerError> {
    validate_id(&user_id, "user ID")?;
    let conversations = state.store.list_by_user(&user_id).await?;
    Ok(Json(
        conversations.iter().map(|c| c.to_response()).collect(),
    ))
}

/// Close a conversation (`PUT /conversations/{id}/end`).  Idempotent:
/// re-ending an already ended conversation succeeds without a write.
#[utoipa::path(
    put,
    path = "/conversations/{id}/end",
    tag = "conversations",
    responses(
        (status = 200, description = "Conversation ended", body = ConversationResponse),
        (status = 400, description = "Invalid conversation ID"),
        (status = 404, description = "Conversation not found"),
    )
)]
pub async fn close_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, ServerError> {
    validate_id(&id, "conversation ID")?;
    let conversation = state.store.end_conversation(&id).await?;
    Ok(Json(conversation.to_response()))
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use crate::chat::ChatService;
    use crate::config::{Config, GeneratorKind};
    use crate::db::sqlite::SqliteStore;
    use crate::db::Sender;
    use crate::generator::rules::RuleBasedGenerator;
    use std::time::Duration;
    use uuid::Uuid;

    fn test_config() -> Config {
        Config {
            bind_address: "127.0.0.1:0".into(),
            database_url: "sqlite::memory:".into(),
            log_level: "info".into(),
            log_json: false,
            cors_allowed_origins: None,
            enable_swagger: false,
            generator: GeneratorKind::Rule,
            llm_api_key: None,
            llm_api_url: String::new(),
            llm_model: String::new(),
            generator_timeout: Duration::from_secs(1),
        }
    }

    async fn test_state() -> Arc<AppState> {
        let store = Arc::new(
            SqliteStore::connect("sqlite::memory:")
                .await
                .expect("in-memory store"),
        );
        let chat = Arc::new(ChatService::new(
            store.clone(),
            Arc::new(RuleBasedGenerator),
            Duration::from_secs(1),
        ));
        Arc::new(AppState {
            config: Arc::new(test_config()),
            store,
            chat,
        })
    }

    fn user_id() -> String {
        Uuid::new_v4().to_string()
    }

    #[tokio::test]
    async fn start_then_read_roundtrip() {
        let state = test_state().await;
        let Json(created) = start_conversation(
            State(state.clone()),
            Json(CreateConversationRequest { user_id: user_id() }),
        )
        .await
        .unwrap();
        assert!(created.is_active);
        assert!(created.messages.is_empty());

        let Json(read) = read_conversation(State(state), Path(created.id.clone()))
            .await
            .unwrap();
        assert_eq!(read.id, created.id);
        assert_eq!(read.session_id, created.session_id);
    }

    #[tokio::test]
    async fn start_rejects_malformed_user_id() {
        let state = test_state().await;
        let err = start_conversation(
            State(state),
            Json(CreateConversationRequest {
                user_id: "12345".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[tokio::test]
    async fn read_unknown_conversation_is_not_found() {
        let state = test_state().await;
        let err = read_conversation(State(state), Path(Uuid::new_v4().to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn add_message_defaults_metadata_to_empty_object() {
        let state = test_state().await;
        let Json(conv) = start_conversation(
            State(state.clone()),
            Json(CreateConversationRequest { user_id: user_id() }),
        )
        .await
        .unwrap();

        let Json(conv) = add_message(
            State(state),
            Path(conv.id),
            Json(AppendMessageRequest {
                text: "hello".into(),
                sender: Sender::User,
                metadata: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(conv.messages.len(), 1);
        assert!(conv.messages[0]
            .metadata
            .as_object()
            .is_some_and(|m| m.is_empty()));
    }

    #[tokio::test]
    async fn close_twice_succeeds() {
        let state = test_state().await;
        let Json(conv) = start_conversation(
            State(state.clone()),
            Json(CreateConversationRequest { user_id: user_id() }),
        )
        .await
        .unwrap();

        let Json(closed) = close_conversation(State(state.clone()), Path(conv.id.clone()))
            .await
            .unwrap();
        assert!(!closed.is_active);
        let Json(closed) = close_conversation(State(state), Path(conv.id))
            .await
            .unwrap();
        assert!(!closed.is_active);
    }
}
