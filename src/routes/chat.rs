//! Primary chat route.
//!
//! One `POST /chat` handles a full turn: the user message and the generated
//! bot reply are both persisted before the conversation is returned.  The
//! orchestration itself lives in [`crate::chat::ChatService`].

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tracing::debug;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::{ChatRequest, ConversationResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(chat), components(schemas(ChatRequest)))]
pub struct ChatApi;

/// Register the chat route.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat", post(chat))
}

/// Handle one chat turn (`POST /chat`).
///
/// Creates a conversation when `conversation_id` is omitted.  Generation
/// failures never fail the turn; the bot reply falls back to a fixed apology.
#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Turn completed", body = ConversationResponse),
        (status = 400, description = "Invalid ID or conversation has ended"),
        (status = 404, description = "Conversation not found"),
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ConversationResponse>, ServerError> {
    debug!(
        user_id = %req.user_id,
        conversation_id = ?req.conversation_id,
        message_len = req.user_message.len(),
        "chat turn"
    );
    let conversation = state
        .chat
        .send_message(
            &req.user_id,
            &req.user_message,
            req.conversation_id.as_deref(),
        )
        .await?;
    Ok(Json(conversation.to_response()))
}
