use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/alive", get(is_alive))
        .route("/version", get(version))
        .with_state(state)
}

/// GET /system/alive
async fn is_alive() -> &'static str {
    "OK"
}

/// GET /system/version
async fn version(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "version": state.config.server_version,
        "active_listeners": state.registry.active_count().await,
    }))
}
