pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::interview::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Interview chat
        .route("/api/chat/:session_id/start", post(handlers::handle_start))
        .route(
            "/api/chat/:session_id",
            post(handlers::handle_chat).delete(handlers::handle_teardown),
        )
        .route(
            "/api/chat/:session_id/history",
            get(handlers::handle_history),
        )
        // Answer feedback
        .route("/api/feedback/grammar", post(handlers::handle_grammar))
        .route("/api/feedback/score", post(handlers::handle_score))
        .with_state(state)
}
