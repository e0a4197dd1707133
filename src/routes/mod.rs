//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router carries everything the messaging core exposes: the
//! websocket endpoint for live traffic, message history REST endpoints,
//! and a health probe. Browser clients connect cross-origin, so CORS is
//! wide open here and access control lives entirely in the token check.

pub mod messages;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/messages", get(messages::list_messages))
        .route("/api/messages/{id}", axum::routing::delete(messages::delete_message))
        .route("/healthz", get(healthz))
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
