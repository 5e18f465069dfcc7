use serde::Deserialize;
use std::{fs, path::Path, str::FromStr, time::Duration};

use crate::errors::ConfigError;
use crate::state::redis_store::RedisSettings;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP port to listen on.
    pub port: u16,

    /// Log level for tracing (e.g. "info", "debug").
    pub log_level: String,

    pub server_version: String,

    /// How long (seconds) a listener's blocking pop waits before it
    /// comes back empty-handed and re-checks its stop signal.
    ///
    /// This is the upper bound on how long a removed listener keeps
    /// running. `0` means wait forever, which makes removal take effect
    /// only after the next value arrives.
    pub block_timeout_seconds: u64,

    /// Client-side timeout (seconds) for a single callback delivery.
    pub callback_timeout_seconds: u64,

    /// How often (seconds) to purge expired keys from the store.
    ///
    /// If `None`, expired keys are only hidden on access, never swept.
    pub cleanup_interval: Option<u64>,

    /// Maximum number of concurrently running listeners.
    ///
    /// If `None`, any number of listeners may run.
    pub max_listeners: Option<usize>,

    /// Redis server to keep keys and lists in.
    ///
    /// If `None`, the process-local in-memory store is used.
    pub redis_host: Option<String>,

    pub redis_port: u16,

    pub redis_password: Option<String>,

    pub redis_db: Option<i64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            log_level: "info".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            block_timeout_seconds: 5,
            callback_timeout_seconds: 10,
            cleanup_interval: Some(60),
            max_listeners: None,
            redis_host: None,
            redis_port: 6379,
            redis_password: None,
            redis_db: None,
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_json(&file).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<AppConfig>(text)
    }

    /// Overrides the Redis settings from `REDIS_HOST`, `REDIS_PORT`,
    /// `REDIS_PASSWORD` and `REDIS_DB`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup("REDIS_HOST") {
            self.redis_host = Some(host);
        }
        if let Some(port) = lookup("REDIS_PORT") {
            self.redis_port = parse_env("REDIS_PORT", port)?;
        }
        if let Some(password) = lookup("REDIS_PASSWORD") {
            self.redis_password = Some(password);
        }
        if let Some(db) = lookup("REDIS_DB") {
            self.redis_db = Some(parse_env("REDIS_DB", db)?);
        }
        Ok(())
    }

    pub fn redis_settings(&self) -> Option<RedisSettings> {
        let host = self.redis_host.as_ref().filter(|h| !h.is_empty())?;
        Some(RedisSettings {
            host: host.clone(),
            port: self.redis_port,
            password: self.redis_password.clone().filter(|p| !p.is_empty()),
            db: self.redis_db,
        })
    }

    /// Copy safe to log: the Redis password is masked.
    pub fn redacted(&self) -> Self {
        Self {
            redis_password: self.redis_password.as_ref().map(|_| "***".to_string()),
            ..self.clone()
        }
    }

    pub fn block_timeout(&self) -> Option<Duration> {
        match self.block_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_seconds)
    }
}

fn parse_env<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { name, value })
}
