use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns service status plus which checkpoint backend is live.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let store = state.service.engine().store();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "jiaf-api",
        "checkpoint_store": store.backend(),
        "durable": store.is_durable(),
        "max_round": state.config.max_round,
    }))
}
