/*****************************************************************************************
 *
 *  DodoBridge – Key–List Store with Blocking-Pop Webhook Listeners
 *  ----------------------------------------------------------------
 *
 *  VERSION: KV/list commands + listener registry (in-memory or Redis store)
 *
 *****************************************************************************************/

use std::path::PathBuf;

use anyhow::Context;
use axum::serve;
use tokio::net::TcpListener;
use tokio::task;
use tokio_util::sync::CancellationToken;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::FmtSubscriber;

use dodo_bridge::app;
use dodo_bridge::config::AppConfig;
use dodo_bridge::services::sweeper::cleanup_loop;
use dodo_bridge::state::store::ListStore;
use dodo_bridge::state::AppState;

const CONFIG_ENV: &str = "DODO_BRIDGE_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    //
    // ────────────────────────────────────────────────────────
    //  Locate and load config.json
    // ────────────────────────────────────────────────────────
    //
    let config_path = locate_config()?;
    let mut cfg = match &config_path {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::default(),
    };
    cfg.apply_env()?;

    //
    // ────────────────────────────────────────────────────────
    //  Configure logging
    // ────────────────────────────────────────────────────────
    //
    let parsed_level = cfg.log_level.parse::<LevelFilter>();
    let level = parsed_level.clone().unwrap_or(LevelFilter::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match &config_path {
        Some(path) => tracing::info!("Loaded config.json from {}", path.display()),
        None => tracing::warn!("No config.json found, using built-in defaults"),
    }
    if parsed_level.is_err() {
        tracing::warn!("Unknown log_level {:?}, falling back to info", cfg.log_level);
    }

    tracing::info!("Starting DodoBridge…");
    tracing::info!("Loaded configuration: {:?}", cfg.redacted());

    if cfg.block_timeout().is_none() {
        tracing::warn!(
            "block_timeout_seconds = 0: removed listeners stop only after their next value"
        );
    }

    //
    // ────────────────────────────────────────────────────────
    //  Create store, dispatcher and listener registry
    // ────────────────────────────────────────────────────────
    //
    let state = AppState::from_config(cfg.clone())
        .context("Failed to create store or callback HTTP client")?;

    match cfg.redis_settings() {
        Some(redis) => tracing::info!("Using Redis store at {}:{}", redis.host, redis.port),
        None => tracing::info!("Using in-memory store"),
    }

    //
    // ────────────────────────────────────────────────────────
    //  Start cleanup loop (optional)
    // ────────────────────────────────────────────────────────
    //
    let shutdown_token = CancellationToken::new();

    // Redis expires keys itself; only the in-memory store is swept.
    if let (Some(clean_interval), Some(memory)) = (cfg.cleanup_interval, state.memory.clone()) {
        tracing::info!("Starting cleanup loop: interval={}s", clean_interval);

        task::spawn(cleanup_loop(memory, clean_interval, shutdown_token.clone()));
    }

    //
    // ────────────────────────────────────────────────────────
    //  Build Axum app (commands + listeners + system routes)
    // ────────────────────────────────────────────────────────
    //
    let app = app::build_app(state.clone());

    //
    // ────────────────────────────────────────────────────────
    //  Bind server and start listening
    // ────────────────────────────────────────────────────────
    //
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!("Listening on http://{}", addr);

    serve(listener, app)
        .with_graceful_shutdown(shutdown(state, shutdown_token))
        .await
        .context("Server error")?;

    Ok(())
}

/// `$DODO_BRIDGE_CONFIG` if set, otherwise config.json next to the
/// executable or one directory up. `None` when neither exists.
fn locate_config() -> anyhow::Result<Option<PathBuf>> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(Some(PathBuf::from(path)));
    }

    let exe_path = std::env::current_exe().context("Cannot get executable path")?;
    let Some(exe_dir) = exe_path.parent() else {
        return Ok(None);
    };

    let candidates = [
        exe_dir.join("config.json"),
        exe_dir.join("..").join("config.json"),
    ];
    Ok(candidates.into_iter().find(|p| p.exists()))
}

//
// ─────────────────────────────────────────────────────────────
//  Graceful shutdown handler
// ─────────────────────────────────────────────────────────────
//
async fn shutdown(state: AppState, cleanup: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }

    tracing::warn!("CTRL+C received, stopping listeners…");
    let stopped = state.registry.stop_all().await;
    cleanup.cancel();

    // Closing the store releases workers parked in a blocking pop.
    state.store.close();
    tracing::info!("Stopped {} listeners. Goodbye.", stopped);
}
