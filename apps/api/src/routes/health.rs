use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns service status, version and scheduler state.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "zume-api",
        "scheduler": {
            "running": state.scheduler.is_running(),
            "triggers": state.scheduler.registered().len(),
        }
    }))
}
