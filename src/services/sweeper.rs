use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::state::store::MemoryStore;

/// Background task that periodically removes expired keys.
///
/// Runs until `shutdown` is cancelled.
pub async fn cleanup_loop(store: Arc<MemoryStore>, every_sec: u64, shutdown: CancellationToken) {
    if every_sec == 0 {
        tracing::warn!("cleanup_loop started with interval = 0; expired keys will not be swept");
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(Duration::from_secs(every_sec)) => {}
        }

        let removed = store.purge_expired();
        if removed > 0 {
            tracing::info!(
                "Cleanup: removed {} expired keys ({} remaining)",
                removed,
                store.len()
            );
        }
    }

    tracing::debug!("Cleanup loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::store::ListStore;

    #[tokio::test(start_paused = true)]
    async fn sweeps_expired_keys_until_shut_down() {
        let store = Arc::new(MemoryStore::new());
        store.set("gone", "x".into()).await.unwrap();
        store.expire("gone", 0).await.unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(cleanup_loop(store.clone(), 1, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        // Nothing left for a manual purge: the loop already took it.
        assert_eq!(store.purge_expired(), 0);

        shutdown.cancel();
        task.await.unwrap();
    }
}
