//! API request / response types.
//!
//! Timestamps serialize as RFC 3339 strings; `to_response` converters keep
//! the wire shape decoupled from the stored aggregates.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::{Conversation, Message, Sender};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateConversationRequest {
    pub user_id: String,
}

/// Body for `POST /conversations/{id}/messages`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AppendMessageRequest {
    pub text: String,
    pub sender: Sender,
    /// Free-form JSON object; omitted means empty.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<serde_json::Value>,
}

/// Body for `POST /chat`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatRequest {
    pub user_message: String,
    pub user_id: String,
    /// Continue an existing conversation; omitted starts a new one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub text: String,
    pub sender: Sender,
    pub timestamp: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationResponse {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub messages: Vec<MessageResponse>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Message {
    pub fn to_response(&self) -> MessageResponse {
        MessageResponse {
            text: self.text.clone(),
            sender: self.sender,
            timestamp: self.timestamp.to_rfc3339(),
            metadata: self.metadata.clone(),
        }
    }
}

impl Conversation {
    pub fn to_response(&self) -> ConversationResponse {
        ConversationResponse {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            messages: self.messages.iter().map(Message::to_response).collect(),
            is_active: self.is_active,
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }
}
