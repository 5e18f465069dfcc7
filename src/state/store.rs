use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use crate::errors::StoreError;

/// Which end of a list an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSide {
    Left,
    Right,
}

/// The store primitives the service is built on.
///
/// `blocking_pop` is the only call allowed to wait: it returns `Ok(None)`
/// once `timeout` elapses with nothing to pop, and waits indefinitely when
/// `timeout` is `None` or too large to schedule.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Refuse all further calls with [`StoreError::Closed`].
    fn close(&self);

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns whether a deadline was attached (the key exists).
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StoreError>;

    /// Returns the list length after the push.
    async fn push(&self, key: &str, side: ListSide, value: String) -> Result<usize, StoreError>;

    async fn pop(&self, key: &str, side: ListSide) -> Result<Option<String>, StoreError>;

    async fn blocking_pop(
        &self,
        key: &str,
        side: ListSide,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, StoreError>;
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

/// A single entry with an optional expiry deadline.
#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// One wakeup handle per key that currently has blocked poppers.
    watchers: HashMap<String, Arc<Notify>>,
    closed: bool,
}

impl Inner {
    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Look up a live entry, dropping it first if it has expired.
    fn live_entry(&mut self, key: &str) -> Option<&mut Entry> {
        if self
            .entries
            .get(key)
            .is_some_and(|e| e.is_expired(Utc::now()))
        {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn pop(&mut self, key: &str, side: ListSide) -> Result<Option<String>, StoreError> {
        let (value, now_empty) = match self.live_entry(key) {
            None => return Ok(None),
            Some(Entry {
                value: Value::Str(_),
                ..
            }) => return Err(StoreError::WrongType(key.to_string())),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let value = match side {
                    ListSide::Left => list.pop_front(),
                    ListSide::Right => list.pop_back(),
                };
                (value, list.is_empty())
            }
        };

        if now_empty {
            self.entries.remove(key);
        }
        Ok(value)
    }

    fn push(&mut self, key: &str, side: ListSide, value: String) -> Result<usize, StoreError> {
        if self.live_entry(key).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::List(VecDeque::new()),
                    expires_at: None,
                },
            );
        }

        let len = match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::List(list)) => {
                match side {
                    ListSide::Left => list.push_front(value),
                    ListSide::Right => list.push_back(value),
                }
                list.len()
            }
            _ => return Err(StoreError::WrongType(key.to_string())),
        };

        if let Some(notify) = self.watchers.get(key) {
            notify.notify_waiters();
        }
        Ok(len)
    }

    fn watcher(&mut self, key: &str) -> Arc<Notify> {
        self.watchers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

/// In-process keyed store holding strings and lists of strings.
///
/// Expired keys read as absent; `purge_expired` reclaims them.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deletes entries whose deadline has passed. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_k, entry| !entry.is_expired(now));
        before.saturating_sub(inner.entries.len())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.lock()
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A blocked popper's claim on the wakeup handle for one key.
///
/// The handle is dropped from the store once its last waiter leaves,
/// whichever way the pop ends.
struct Watch<'a> {
    store: &'a MemoryStore,
    key: &'a str,
    notify: Arc<Notify>,
}

impl Drop for Watch<'_> {
    fn drop(&mut self) {
        let mut inner = self.store.lock();
        // Ours and the map's.
        if Arc::strong_count(&self.notify) == 2 {
            inner.watchers.remove(self.key);
        }
    }
}

#[async_trait]
impl ListStore for MemoryStore {
    /// Every blocked and future call fails with [`StoreError::Closed`].
    fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        for notify in inner.watchers.values() {
            notify.notify_waiters();
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.lock();
        inner.check_open()?;
        match inner.live_entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_open()?;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        inner.check_open()?;
        let existed = inner.live_entry(key).is_some();
        inner.entries.remove(key);
        Ok(existed)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        inner.check_open()?;
        let Some(entry) = inner.live_entry(key) else {
            return Ok(false);
        };

        // Deadlines too far out to represent simply never fire.
        entry.expires_at = i64::try_from(seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|delta| Utc::now().checked_add_signed(delta));
        Ok(true)
    }

    async fn push(&self, key: &str, side: ListSide, value: String) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        inner.check_open()?;
        inner.push(key, side, value)
    }

    async fn pop(&self, key: &str, side: ListSide) -> Result<Option<String>, StoreError> {
        let mut inner = self.lock();
        inner.check_open()?;
        inner.pop(key, side)
    }

    async fn blocking_pop(
        &self,
        key: &str,
        side: ListSide,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, StoreError> {
        // A deadline past what `Instant` can hold is as good as none.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut watch: Option<Watch<'_>> = None;

        loop {
            // The wakeup future is created under the lock so a push that
            // lands right after we give the lock up is not missed.
            let notified = {
                let mut inner = self.lock();
                inner.check_open()?;
                if let Some(value) = inner.pop(key, side)? {
                    return Ok(Some(value));
                }
                let watch = watch.get_or_insert_with(|| Watch {
                    store: self,
                    key,
                    notify: inner.watcher(key),
                });
                watch.notify.notified()
            };

            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_are_fifo_across_opposite_ends() {
        let store = MemoryStore::new();
        store.push("q", ListSide::Left, "a".into()).await.unwrap();
        store.push("q", ListSide::Left, "b".into()).await.unwrap();

        assert_eq!(store.pop("q", ListSide::Right).await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.pop("q", ListSide::Right).await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.pop("q", ListSide::Right).await.unwrap(), None);
        assert!(store.is_empty(), "drained list should be removed");
    }

    #[tokio::test]
    async fn list_commands_reject_string_keys() {
        let store = MemoryStore::new();
        store.set("k", "v".into()).await.unwrap();

        assert_eq!(
            store.push("k", ListSide::Right, "x".into()).await,
            Err(StoreError::WrongType("k".into()))
        );
        assert_eq!(
            store.pop("k", ListSide::Left).await,
            Err(StoreError::WrongType("k".into()))
        );
    }

    #[tokio::test]
    async fn blocking_pop_times_out_empty_handed() {
        let store = MemoryStore::new();
        let got = store
            .blocking_pop("q", ListSide::Left, Some(Duration::from_millis(20)))
            .await
            .unwrap();

        assert_eq!(got, None);
        assert!(store.lock().watchers.is_empty());
    }

    #[tokio::test]
    async fn blocking_pop_wakes_on_push() {
        let store = Arc::new(MemoryStore::new());

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.blocking_pop("q", ListSide::Left, None).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push("q", ListSide::Right, "v1".into()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("blocked pop should wake up")
            .unwrap()
            .unwrap();
        assert_eq!(got.as_deref(), Some("v1"));
        assert!(store.lock().watchers.is_empty());
    }

    #[tokio::test]
    async fn watchers_do_not_pile_up_across_keys() {
        let store = Arc::new(MemoryStore::new());

        for i in 0..50 {
            let key = format!("k{i}");
            let waiter = {
                let store = store.clone();
                let key = key.clone();
                tokio::spawn(async move { store.blocking_pop(&key, ListSide::Left, None).await })
            };
            tokio::time::sleep(Duration::from_millis(2)).await;
            store.push(&key, ListSide::Right, "v".into()).await.unwrap();
            waiter.await.unwrap().unwrap();
        }

        assert!(store.lock().watchers.is_empty());
    }

    #[tokio::test]
    async fn concurrent_timeouts_release_the_shared_watcher() {
        let store = Arc::new(MemoryStore::new());

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .blocking_pop("q", ListSide::Left, Some(Duration::from_millis(20)))
                        .await
                })
            })
            .collect();
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok(None));
        }

        assert!(store.lock().watchers.is_empty());
    }

    #[tokio::test]
    async fn unschedulable_timeout_waits_like_no_timeout() {
        let store = Arc::new(MemoryStore::new());

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .blocking_pop("q", ListSide::Left, Some(Duration::from_secs(u64::MAX)))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push("q", ListSide::Right, "v1".into()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("blocked pop should wake up")
            .expect("huge timeout must not panic the pop")
            .unwrap();
        assert_eq!(got.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn close_fails_blocked_poppers() {
        let store = Arc::new(MemoryStore::new());

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.blocking_pop("q", ListSide::Left, None).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.close();

        let got = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("close should release the waiter")
            .unwrap();
        assert_eq!(got, Err(StoreError::Closed));
        assert_eq!(store.get("k").await, Err(StoreError::Closed));
    }

    #[tokio::test]
    async fn expired_keys_read_as_absent_and_get_purged() {
        let store = MemoryStore::new();
        store.set("gone", "x".into()).await.unwrap();
        store.set("kept", "y".into()).await.unwrap();

        assert!(store.expire("gone", 0).await.unwrap());
        assert!(!store.expire("missing", 10).await.unwrap());

        assert_eq!(store.get("gone").await.unwrap(), None);
        assert_eq!(store.get("kept").await.unwrap().as_deref(), Some("y"));

        store.expire("kept", 0).await.unwrap();
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_reports_whether_key_existed() {
        let store = MemoryStore::new();
        store.push("q", ListSide::Left, "a".into()).await.unwrap();

        assert!(store.delete("q").await.unwrap());
        assert!(!store.delete("q").await.unwrap());
    }
}
