use std::time::Duration;

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::BridgeError;
use crate::routes::extract::JsonBody;
use crate::state::store::{ListSide, ListStore};
use crate::state::AppState;

/// Build the one-shot store commands, each `POST /<command>`.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/set", post(set))
        .route("/get", post(get))
        .route("/del", post(delete))
        .route("/expire", post(expire))
        .route("/lpush", post(lpush))
        .route("/rpush", post(rpush))
        .route("/lpop", post(lpop))
        .route("/rpop", post(rpop))
        .route("/blpop", post(blpop))
        .route("/brpop", post(brpop))
        .with_state(state)
}

/// Body shared by every command; each uses the fields it needs.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CommandRequest {
    pub key: String,
    pub value: Option<Value>,
    pub seconds: Option<u64>,
    /// Blocking pops only; `0` or absent waits forever.
    pub timeout: Option<u64>,
}

impl CommandRequest {
    fn key(&self) -> Result<&str, BridgeError> {
        if self.key.is_empty() {
            return Err(BridgeError::InvalidRequest("`key` is required".into()));
        }
        Ok(&self.key)
    }

    /// Strings are stored verbatim, anything else as its JSON text.
    fn value(&self) -> Result<String, BridgeError> {
        match &self.value {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Null) | None => {
                Err(BridgeError::InvalidRequest("`value` is required".into()))
            }
            Some(other) => Ok(other.to_string()),
        }
    }
}

type CommandResult = Result<Json<Value>, BridgeError>;

fn ok() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn ok_result(result: Option<String>) -> Json<Value> {
    Json(json!({ "status": "ok", "result": result }))
}

async fn set(State(state): State<AppState>, JsonBody(req): JsonBody<CommandRequest>) -> CommandResult {
    state.store.set(req.key()?, req.value()?).await?;
    Ok(ok())
}

async fn get(State(state): State<AppState>, JsonBody(req): JsonBody<CommandRequest>) -> CommandResult {
    Ok(ok_result(state.store.get(req.key()?).await?))
}

async fn delete(State(state): State<AppState>, JsonBody(req): JsonBody<CommandRequest>) -> CommandResult {
    state.store.delete(req.key()?).await?;
    Ok(ok())
}

async fn expire(State(state): State<AppState>, JsonBody(req): JsonBody<CommandRequest>) -> CommandResult {
    let seconds = req
        .seconds
        .ok_or_else(|| BridgeError::InvalidRequest("`seconds` is required".into()))?;
    state.store.expire(req.key()?, seconds).await?;
    Ok(ok())
}

async fn push(state: &AppState, req: &CommandRequest, side: ListSide) -> CommandResult {
    state.store.push(req.key()?, side, req.value()?).await?;
    Ok(ok())
}

async fn pop(state: &AppState, req: &CommandRequest, side: ListSide) -> CommandResult {
    Ok(ok_result(state.store.pop(req.key()?, side).await?))
}

async fn blocking_pop(state: &AppState, req: &CommandRequest, side: ListSide) -> CommandResult {
    let timeout = match req.timeout {
        None | Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
    };
    Ok(ok_result(
        state.store.blocking_pop(req.key()?, side, timeout).await?,
    ))
}

async fn lpush(State(state): State<AppState>, JsonBody(req): JsonBody<CommandRequest>) -> CommandResult {
    push(&state, &req, ListSide::Left).await
}

async fn rpush(State(state): State<AppState>, JsonBody(req): JsonBody<CommandRequest>) -> CommandResult {
    push(&state, &req, ListSide::Right).await
}

async fn lpop(State(state): State<AppState>, JsonBody(req): JsonBody<CommandRequest>) -> CommandResult {
    pop(&state, &req, ListSide::Left).await
}

async fn rpop(State(state): State<AppState>, JsonBody(req): JsonBody<CommandRequest>) -> CommandResult {
    pop(&state, &req, ListSide::Right).await
}

async fn blpop(State(state): State<AppState>, JsonBody(req): JsonBody<CommandRequest>) -> CommandResult {
    blocking_pop(&state, &req, ListSide::Left).await
}

async fn brpop(State(state): State<AppState>, JsonBody(req): JsonBody<CommandRequest>) -> CommandResult {
    blocking_pop(&state, &req, ListSide::Right).await
}
