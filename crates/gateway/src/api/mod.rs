pub mod chat;
pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/chats", post(chat::create_chat))
        .route("/v1/chats/:chat_id/turns", post(chat::create_turn))
}
