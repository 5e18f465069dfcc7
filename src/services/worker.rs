//! The pop worker: one background task per listener.
//!
//! Each worker loops over *blocking pop, deliver, check stop signal* until
//! it is stopped or the store fails. Stopping is cooperative: the signal is
//! only looked at between pops, so a worker parked inside a blocking pop
//! notices it once that pop returns. With a `block_timeout` of `T` a stop
//! therefore takes effect within `T`; without one it waits for the next
//! value on the key.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::errors::StoreError;
use crate::services::dispatcher::{Delivery, Dispatch};
use crate::state::listener::{Subscription, SubscriptionState};
use crate::state::store::ListStore;

/// Why a worker's loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Cancelled,
    StoreFailed(StoreError),
}

pub struct PopWorker {
    subscription: Subscription,
    store: Arc<dyn ListStore>,
    dispatcher: Arc<dyn Dispatch>,
    block_timeout: Option<Duration>,
}

/// Registry-side view of a spawned worker.
pub struct ListenerHandle {
    subscription: Subscription,
    cancel: CancellationToken,
    started: Arc<AtomicBool>,
    task: JoinHandle<WorkerExit>,
}

impl PopWorker {
    pub fn new(
        subscription: Subscription,
        store: Arc<dyn ListStore>,
        dispatcher: Arc<dyn Dispatch>,
        block_timeout: Option<Duration>,
    ) -> Self {
        Self {
            subscription,
            store,
            dispatcher,
            block_timeout,
        }
    }

    /// Start the loop on its own task.
    pub fn spawn(self) -> ListenerHandle {
        let cancel = CancellationToken::new();
        let started = Arc::new(AtomicBool::new(false));
        let subscription = self.subscription.clone();
        let span = tracing::info_span!("listener", id = %subscription.id);

        let task = tokio::spawn(
            self.run(cancel.clone(), started.clone())
                .instrument(span),
        );

        ListenerHandle {
            subscription,
            cancel,
            started,
            task,
        }
    }

    async fn run(self, cancel: CancellationToken, started: Arc<AtomicBool>) -> WorkerExit {
        started.store(true, Ordering::Release);

        let sub = &self.subscription;
        let side = sub.event.side();
        tracing::info!(
            "Listener running: event={}, key={}, endpoint={}",
            sub.event,
            sub.key,
            sub.endpoint
        );

        let exit = loop {
            if cancel.is_cancelled() {
                break WorkerExit::Cancelled;
            }

            let value = match self
                .store
                .blocking_pop(&sub.key, side, self.block_timeout)
                .await
            {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!("Store failure on key `{}`, listener terminating: {e}", sub.key);
                    break WorkerExit::StoreFailed(e);
                }
            };

            // Stopped while we were parked in the pop: put the value back
            // where it came from instead of delivering it.
            if cancel.is_cancelled() {
                if let Err(e) = self.store.push(&sub.key, side, value).await {
                    tracing::warn!("Could not return popped value to `{}`: {e}", sub.key);
                }
                break WorkerExit::Cancelled;
            }

            let delivery = Delivery::new(sub, value);
            match self.dispatcher.deliver(&sub.endpoint, &delivery).await {
                Ok(()) => tracing::debug!("Delivered value from `{}` to {}", sub.key, sub.endpoint),
                Err(e) => tracing::warn!("Error sending value to {}: {}", sub.endpoint, e),
            }
        };

        tracing::info!("Listener stopped: {:?}", exit);
        exit
    }
}

impl ListenerHandle {
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Ask the worker to stop after its current pop. Does not wait.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> SubscriptionState {
        if !self.is_running() {
            SubscriptionState::Terminated
        } else if self.cancel.is_cancelled() {
            SubscriptionState::Stopping
        } else if self.started.load(Ordering::Acquire) {
            SubscriptionState::Running
        } else {
            SubscriptionState::Starting
        }
    }

    /// Wait for the worker to finish. `None` if its task panicked.
    pub async fn join(self) -> Option<WorkerExit> {
        self.task.await.ok()
    }
}
