use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::errors::BridgeError;
use crate::services::dispatcher::Dispatch;
use crate::services::worker::{ListenerHandle, PopWorker};
use crate::state::listener::{AddListener, ListenerStatus, SubscriptionState};
use crate::state::store::ListStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Started,
    AlreadyActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Stopped,
    AlreadyInactive,
}

impl AddOutcome {
    /// Plain-text body returned by `/listener/add`.
    pub fn as_str(self) -> &'static str {
        match self {
            AddOutcome::Started => "ok",
            AddOutcome::AlreadyActive => "already_active",
        }
    }
}

impl RemoveOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoveOutcome::Stopped => "ok",
            RemoveOutcome::AlreadyInactive => "already_inactive",
        }
    }
}

/// Owns every listener worker, keyed by subscription id.
///
/// The map lock is held across each lookup-and-spawn, so two concurrent
/// `add`s for the same id can never both start a worker. Entries are
/// never deleted, only replaced once their worker has terminated.
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, ListenerHandle>>,
    store: Arc<dyn ListStore>,
    dispatcher: Arc<dyn Dispatch>,
    block_timeout: Option<Duration>,
    max_listeners: Option<usize>,
}

impl ListenerRegistry {
    pub fn new(
        store: Arc<dyn ListStore>,
        dispatcher: Arc<dyn Dispatch>,
        block_timeout: Option<Duration>,
        max_listeners: Option<usize>,
    ) -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            store,
            dispatcher,
            block_timeout,
            max_listeners,
        }
    }

    pub async fn add(&self, request: AddListener) -> Result<AddOutcome, BridgeError> {
        let subscription = request.validate()?;
        let mut listeners = self.listeners.lock().await;

        if listeners
            .get(&subscription.id)
            .is_some_and(ListenerHandle::is_running)
        {
            tracing::debug!("Listener `{}` already active", subscription.id);
            return Ok(AddOutcome::AlreadyActive);
        }

        if let Some(max) = self.max_listeners {
            let running = listeners.values().filter(|h| h.is_running()).count();
            if running >= max {
                tracing::warn!(
                    "Refusing listener `{}`: {} of {} slots in use",
                    subscription.id,
                    running,
                    max
                );
                return Err(BridgeError::AtCapacity(max));
            }
        }

        let id = subscription.id.clone();
        let handle = PopWorker::new(
            subscription,
            self.store.clone(),
            self.dispatcher.clone(),
            self.block_timeout,
        )
        .spawn();

        if listeners.insert(id.clone(), handle).is_some() {
            tracing::info!("Listener `{}` restarted", id);
        } else {
            tracing::info!("Listener `{}` started", id);
        }
        Ok(AddOutcome::Started)
    }

    /// Flags the worker for shutdown and returns without waiting for it.
    pub async fn remove(&self, id: &str) -> Result<RemoveOutcome, BridgeError> {
        if id.is_empty() {
            return Err(BridgeError::InvalidRequest("`id` is required".into()));
        }

        let listeners = self.listeners.lock().await;
        match listeners.get(id) {
            Some(handle) if handle.is_running() => {
                handle.stop();
                tracing::info!("Listener `{}` asked to stop", id);
                Ok(RemoveOutcome::Stopped)
            }
            _ => Ok(RemoveOutcome::AlreadyInactive),
        }
    }

    pub async fn state(&self, id: &str) -> Option<SubscriptionState> {
        self.listeners.lock().await.get(id).map(ListenerHandle::state)
    }

    pub async fn is_active(&self, id: &str) -> bool {
        self.listeners
            .lock()
            .await
            .get(id)
            .is_some_and(ListenerHandle::is_running)
    }

    pub async fn active_count(&self) -> usize {
        self.listeners
            .lock()
            .await
            .values()
            .filter(|h| h.is_running())
            .count()
    }

    /// Every known listener, sorted by id.
    pub async fn list(&self) -> Vec<ListenerStatus> {
        let listeners = self.listeners.lock().await;
        let mut out: Vec<ListenerStatus> = listeners
            .values()
            .map(|h| ListenerStatus {
                subscription: h.subscription().clone(),
                state: h.state(),
            })
            .collect();
        out.sort_by(|a, b| a.subscription.id.cmp(&b.subscription.id));
        out
    }

    /// Flags every running worker to stop. Returns how many were flagged.
    pub async fn stop_all(&self) -> usize {
        let listeners = self.listeners.lock().await;
        let mut stopped = 0;
        for handle in listeners.values().filter(|h| h.is_running()) {
            handle.stop();
            stopped += 1;
        }
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::worker::tests::{eventually, RecordingDispatcher};
    use crate::state::store::{ListSide, MemoryStore};

    fn registry(store: Arc<MemoryStore>, dispatcher: Arc<RecordingDispatcher>) -> ListenerRegistry {
        ListenerRegistry::new(store, dispatcher, Some(Duration::from_millis(20)), None)
    }

    fn add_request(id: &str) -> AddListener {
        AddListener::new(id, "lpop", "q", "http://cb/x")
    }

    async fn wait_terminated(registry: &ListenerRegistry, id: &str) -> bool {
        for _ in 0..200 {
            if registry.state(id).await == Some(SubscriptionState::Terminated) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn fresh_id_starts_one_worker() {
        let registry = registry(Arc::new(MemoryStore::new()), Default::default());

        assert_eq!(registry.add(add_request("s1")).await.unwrap(), AddOutcome::Started);
        assert!(registry.is_active("s1").await);
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn second_add_while_running_is_a_no_op() {
        let registry = registry(Arc::new(MemoryStore::new()), Default::default());

        registry.add(add_request("s1")).await.unwrap();
        assert_eq!(
            registry.add(add_request("s1")).await.unwrap(),
            AddOutcome::AlreadyActive
        );
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_adds_for_one_id_start_exactly_one_worker() {
        let registry = Arc::new(registry(Arc::new(MemoryStore::new()), Default::default()));

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.add(add_request("s1")).await })
            })
            .collect();

        let mut started = 0;
        for attempt in attempts {
            if attempt.await.unwrap().unwrap() == AddOutcome::Started {
                started += 1;
            }
        }

        assert_eq!(started, 1);
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn remove_unknown_id_is_already_inactive() {
        let registry = registry(Arc::new(MemoryStore::new()), Default::default());

        assert_eq!(
            registry.remove("nope").await.unwrap(),
            RemoveOutcome::AlreadyInactive
        );
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn remove_stops_the_worker_and_later_remove_is_inactive() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let registry = registry(Arc::new(MemoryStore::new()), dispatcher.clone());

        registry.add(add_request("s1")).await.unwrap();
        assert_eq!(registry.remove("s1").await.unwrap(), RemoveOutcome::Stopped);
        assert!(wait_terminated(&registry, "s1").await);

        assert_eq!(
            registry.remove("s1").await.unwrap(),
            RemoveOutcome::AlreadyInactive
        );
        assert!(dispatcher.values().is_empty());
    }

    #[tokio::test]
    async fn terminated_listener_can_be_added_again() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let registry = registry(store.clone(), dispatcher.clone());

        registry.add(add_request("s1")).await.unwrap();
        registry.remove("s1").await.unwrap();
        assert!(wait_terminated(&registry, "s1").await);

        assert_eq!(registry.add(add_request("s1")).await.unwrap(), AddOutcome::Started);

        store.push("q", ListSide::Right, "v1".into()).await.unwrap();
        assert!(eventually(|| dispatcher.values() == vec!["v1"]).await);
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn listener_killed_by_store_error_can_be_restarted() {
        // Key holds a string, so the worker's first pop fails.
        let store = Arc::new(MemoryStore::new());
        store.set("q", "not a list".into()).await.unwrap();
        let registry = registry(store.clone(), Default::default());

        registry.add(add_request("s1")).await.unwrap();
        assert!(wait_terminated(&registry, "s1").await);

        store.delete("q").await.unwrap();
        assert_eq!(registry.add(add_request("s1")).await.unwrap(), AddOutcome::Started);
        assert!(registry.is_active("s1").await);
    }

    #[tokio::test]
    async fn invalid_requests_start_nothing() {
        let registry = registry(Arc::new(MemoryStore::new()), Default::default());

        let err = registry
            .add(AddListener::new("s1", "lindex", "q", "http://cb/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedEvent(_)));
        assert!(matches!(
            registry.remove("").await,
            Err(BridgeError::InvalidRequest(_))
        ));
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn capacity_limit_refuses_new_listeners() {
        let registry = ListenerRegistry::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingDispatcher::default()),
            Some(Duration::from_millis(20)),
            Some(1),
        );

        registry.add(add_request("s1")).await.unwrap();
        assert!(matches!(
            registry.add(add_request("s2")).await,
            Err(BridgeError::AtCapacity(1))
        ));

        registry.remove("s1").await.unwrap();
        assert!(wait_terminated(&registry, "s1").await);
        assert_eq!(registry.add(add_request("s2")).await.unwrap(), AddOutcome::Started);
    }

    #[tokio::test]
    async fn stop_all_flags_every_running_listener() {
        let registry = registry(Arc::new(MemoryStore::new()), Default::default());
        registry.add(add_request("a")).await.unwrap();
        registry.add(add_request("b")).await.unwrap();

        assert_eq!(registry.stop_all().await, 2);
        assert!(wait_terminated(&registry, "a").await);
        assert!(wait_terminated(&registry, "b").await);
    }
}
