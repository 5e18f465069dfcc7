use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::errors::BridgeError;
use crate::routes::extract::JsonBody;
use crate::state::listener::{AddListener, ListenerStatus, RemoveListener};
use crate::state::AppState;

/// Build all listener routes under /listener
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/add", post(add_listener))
        .route("/remove", post(remove_listener))
        .route("/list", get(list_listeners))
        .with_state(state)
}

//
// ─────────────────────────────────────────────────────────────
// POST /listener/add
// Start popping `data.key` and posting values to `endpoint`
// ─────────────────────────────────────────────────────────────
//
async fn add_listener(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<AddListener>,
) -> Result<String, BridgeError>
{
    let outcome = state.registry.add(req).await?;
    Ok(format!("{}\n", outcome.as_str()))
}

//
// ─────────────────────────────────────────────────────────────
// POST /listener/remove
// Ask a listener to stop; does not wait for it
// ─────────────────────────────────────────────────────────────
//
async fn remove_listener(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RemoveListener>,
) -> Result<String, BridgeError>
{
    let outcome = state.registry.remove(&req.id).await?;
    Ok(format!("{}\n", outcome.as_str()))
}

//
// ─────────────────────────────────────────────────────────────
// GET /listener/list
// Every listener seen since startup, with its state
// ─────────────────────────────────────────────────────────────
//
async fn list_listeners(
    State(state): State<AppState>,
) -> Json<Vec<ListenerStatus>>
{
    Json(state.registry.list().await)
}
