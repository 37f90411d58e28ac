use utoipa::OpenApi;

use crate::routes::{chat, conversations, health};

#[derive(OpenApi)]
#[openapi(info(
    title = "cartbot-server",
    description = "E-commerce chatbot API",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(conversations::ConversationsApi::openapi());
    root.merge(chat::ChatApi::openapi());
    root
}
