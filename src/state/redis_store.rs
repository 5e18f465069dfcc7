use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use tokio::sync::OnceCell;

use crate::errors::StoreError;
use crate::state::store::{ListSide, ListStore};

/// Longest wait handed to `BLPOP`/`BRPOP`. Anything above waits forever.
const MAX_BLOCK_SECONDS: f64 = 1e9;

/// Connection settings for an external Redis server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: Option<i64>,
}

impl RedisSettings {
    /// `redis://[:password@]host:port[/db]`
    pub fn url(&self) -> String {
        let auth = match &self.password {
            Some(password) => format!(":{password}@"),
            None => String::new(),
        };
        let db = match self.db {
            Some(db) => format!("/{db}"),
            None => String::new(),
        };
        format!("redis://{auth}{}:{}{db}", self.host, self.port)
    }
}

/// [`ListStore`] backed by a Redis server.
///
/// Plain commands share one multiplexed connection, opened on first use.
/// Every blocking pop gets a connection of its own so a parked `BLPOP`
/// never holds up other traffic.
pub struct RedisStore {
    client: Client,
    shared: OnceCell<MultiplexedConnection>,
    closed: AtomicBool,
}

impl RedisStore {
    /// Does not connect; connection problems surface on the first command.
    pub fn open(settings: &RedisSettings) -> Result<Self, RedisError> {
        Ok(Self {
            client: Client::open(settings.url())?,
            shared: OnceCell::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    async fn connection(&self, key: &str) -> Result<MultiplexedConnection, StoreError> {
        self.check_open()?;
        let con = self
            .shared
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await
            .map_err(|e| store_error(key, e))?;
        Ok(con.clone())
    }
}

/// Server-side `WRONGTYPE` keeps its meaning; everything else (refused
/// connections, dropped sockets, protocol errors) is a backend failure.
fn store_error(key: &str, err: RedisError) -> StoreError {
    if err.code() == Some("WRONGTYPE") {
        StoreError::WrongType(key.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

fn side_command(side: ListSide, left: &'static str, right: &'static str) -> &'static str {
    match side {
        ListSide::Left => left,
        ListSide::Right => right,
    }
}

/// Seconds for a blocking pop; `0` is Redis for "wait forever".
fn block_seconds(timeout: Option<Duration>) -> f64 {
    match timeout.map(|t| t.as_secs_f64()) {
        Some(secs) if secs <= MAX_BLOCK_SECONDS => secs,
        _ => 0.0,
    }
}

#[async_trait]
impl ListStore for RedisStore {
    /// Marks the store closed. A pop already parked on the server still
    /// runs until its own timeout.
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut con = self.connection(key).await?;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(|e| store_error(key, e))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut con = self.connection(key).await?;
        let () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut con)
            .await
            .map_err(|e| store_error(key, e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut con = self.connection(key).await?;
        let removed: usize = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(|e| store_error(key, e))?;
        Ok(removed > 0)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StoreError> {
        let mut con = self.connection(key).await?;
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut con)
            .await
            .map_err(|e| store_error(key, e))
    }

    async fn push(&self, key: &str, side: ListSide, value: String) -> Result<usize, StoreError> {
        let mut con = self.connection(key).await?;
        redis::cmd(side_command(side, "LPUSH", "RPUSH"))
            .arg(key)
            .arg(value)
            .query_async(&mut con)
            .await
            .map_err(|e| store_error(key, e))
    }

    async fn pop(&self, key: &str, side: ListSide) -> Result<Option<String>, StoreError> {
        let mut con = self.connection(key).await?;
        redis::cmd(side_command(side, "LPOP", "RPOP"))
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(|e| store_error(key, e))
    }

    async fn blocking_pop(
        &self,
        key: &str,
        side: ListSide,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, StoreError> {
        self.check_open()?;
        let mut con = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| store_error(key, e))?;

        // Replies with [key, value], or nil once the timeout passes.
        let popped: Option<(String, String)> = redis::cmd(side_command(side, "BLPOP", "BRPOP"))
            .arg(key)
            .arg(block_seconds(timeout))
            .query_async(&mut con)
            .await
            .map_err(|e| store_error(key, e))?;
        Ok(popped.map(|(_key, value)| value))
    }
}
