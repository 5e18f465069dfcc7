use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures raised by the list store.
///
/// Any of these surfacing inside a pop worker terminates that worker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store is closed")]
    Closed,

    #[error("WRONGTYPE operation against key `{0}` holding the wrong kind of value")]
    WrongType(String),

    /// Connection or protocol failure talking to an external store.
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Failure to hand a popped value to a callback endpoint.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("callback request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("invalid value `{value}` for {name}")]
    Env { name: &'static str, value: String },

    #[error("invalid redis settings: {0}")]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Errors surfaced synchronously to HTTP callers.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported event `{0}`, expected `lpop` or `rpop`")]
    UnsupportedEvent(String),

    #[error("listener capacity of {0} reached")]
    AtCapacity(usize),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BridgeError {
    pub fn status(&self) -> StatusCode {
        match self {
            BridgeError::InvalidRequest(_) | BridgeError::UnsupportedEvent(_) => {
                StatusCode::BAD_REQUEST
            }
            BridgeError::Store(StoreError::WrongType(_)) => StatusCode::BAD_REQUEST,
            BridgeError::AtCapacity(_)
            | BridgeError::Store(StoreError::Closed)
            | BridgeError::Store(StoreError::Backend(_)) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<JsonRejection> for BridgeError {
    fn from(rejection: JsonRejection) -> Self {
        BridgeError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "error",
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
