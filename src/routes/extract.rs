use axum::extract::FromRequest;

use crate::errors::BridgeError;

/// `Json<T>` whose rejections (bad syntax, wrong field types, missing
/// content type) answer like every other invalid request: 400 with the
/// JSON error body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(BridgeError))]
pub struct JsonBody<T>(pub T);
