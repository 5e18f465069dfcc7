use axum::Router;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::routes::{command_routes, listener_routes, system_routes};
use crate::state::AppState;

/// Build the complete Axum application:
/// - /<command>  (one-shot store commands: set, get, lpush, blpop, ...)
/// - /listener   (add/remove/list blocking-pop listeners)
/// - /system     (alive + version)
pub fn build_app(state: AppState) -> Router {
    Router::new()
        // /set, /get, /lpush, ...
        .merge(command_routes::routes(state.clone()))

        // /listener/*
        .nest("/listener", listener_routes::routes(state.clone()))

        // /system/*
        .nest("/system", system_routes::routes(state))

        // Logging middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
