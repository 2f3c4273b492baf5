pub mod auth;
pub mod chats;
pub mod media;
pub mod stories;
pub mod users;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;
use crate::ws;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::websocket_handler))
        .nest("/api/auth", auth::router())
        .nest("/api/users", users::router())
        .nest("/api/chats", chats::router())
        .nest("/api/stories", stories::router())
        .nest("/api/media", media::router())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
