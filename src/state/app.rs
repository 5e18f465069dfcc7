use std::sync::Arc;

use crate::config::AppConfig;
use crate::errors::ConfigError;
use crate::services::dispatcher::HttpDispatcher;
use crate::services::registry::ListenerRegistry;
use crate::state::redis_store::RedisStore;
use crate::state::store::{ListStore, MemoryStore};

/// Shared application state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ListStore>,
    /// Set when `store` is the in-process store, which needs sweeping.
    pub memory: Option<Arc<MemoryStore>>,
    pub registry: Arc<ListenerRegistry>,
    pub config: AppConfig,
}

impl AppState {
    /// Store, HTTP dispatcher and empty registry wired per `config`.
    ///
    /// With `redis_host` set, keys and lists live in that Redis server;
    /// otherwise in a fresh [`MemoryStore`].
    pub fn from_config(config: AppConfig) -> Result<Self, ConfigError> {
        let (store, memory) = match config.redis_settings() {
            Some(settings) => {
                let redis: Arc<dyn ListStore> = Arc::new(RedisStore::open(&settings)?);
                (redis, None)
            }
            None => {
                let memory = Arc::new(MemoryStore::new());
                let store: Arc<dyn ListStore> = memory.clone();
                (store, Some(memory))
            }
        };

        let dispatcher = Arc::new(HttpDispatcher::new(config.callback_timeout())?);
        let registry = Arc::new(ListenerRegistry::new(
            store.clone(),
            dispatcher,
            config.block_timeout(),
            config.max_listeners,
        ));

        Ok(Self {
            store,
            memory,
            registry,
            config,
        })
    }
}
