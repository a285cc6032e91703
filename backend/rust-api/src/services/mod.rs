use std::sync::Arc;

use crate::config::{Config, StorageBackend};
use crate::store::{MemoryStore, MongoStore, PresenceStore};
use redis::aio::ConnectionManager;

pub mod attendance_service;
pub mod effective_status;
pub mod error;
pub mod notifier;
pub mod session_service;
pub mod stats_service;

pub use error::PresenceError;
pub use notifier::AttendanceNotifier;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn PresenceStore>,
    pub redis: Option<ConnectionManager>,
    pub notifier: AttendanceNotifier,
}

impl AppState {
    /// Connects the backends named in `config`.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn PresenceStore> = match config.storage_backend {
            StorageBackend::Mongo => {
                let client = mongodb::Client::with_uri_str(&config.mongo_uri).await?;
                let store = MongoStore::new(client, &config.mongo_database);
                store.ensure_indexes().await?;
                tracing::info!("MongoDB connected");
                Arc::new(store)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let redis = match &config.redis_uri {
            Some(uri) => Some(connect_redis(uri).await?),
            None => {
                tracing::info!("REDIS_URI not set; rate limiting and remote notifications disabled");
                None
            }
        };

        Ok(Self::with_store(config, store, redis))
    }

    pub fn with_store(
        config: Config,
        store: Arc<dyn PresenceStore>,
        redis: Option<ConnectionManager>,
    ) -> Self {
        let notifier = AttendanceNotifier::new(redis.clone());
        Self {
            config,
            store,
            redis,
            notifier,
        }
    }
}

async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    tracing::info!("Attempting to connect to Redis...");

    let client = redis::Client::open(uri)?;
    let redis = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        ConnectionManager::new(client),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let mut conn = redis.clone();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}
