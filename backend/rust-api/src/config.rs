use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Mongo,
    Memory,
}

impl StorageBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Some(StorageBackend::Mongo),
            "memory" | "in-memory" => Some(StorageBackend::Memory),
            _ => None,
        }
    }
}

/// Timing knobs of the presence core.
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    /// Heartbeat staleness after which a student is shown as offline.
    pub offline_timeout_secs: u64,
    /// Keep-alive cadence of the student client.
    pub heartbeat_interval_secs: u64,
    /// Input silence after which the client reports IDLE.
    pub idle_threshold_secs: u64,
    /// Refresh period of the teacher's attendance stream.
    pub stream_tick_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            offline_timeout_secs: 60,
            heartbeat_interval_secs: 30,
            idle_threshold_secs: 60,
            stream_tick_ms: 1000,
        }
    }
}

impl PresenceConfig {
    pub fn offline_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.offline_timeout_secs as i64)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn stream_tick(&self) -> Duration {
        Duration::from_millis(self.stream_tick_ms.max(100))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage_backend: StorageBackend,
    pub mongo_uri: String,
    pub mongo_database: String,
    /// Optional: enables the join rate limit and cross-process change notifications.
    pub redis_uri: Option<String>,
    pub jwt_secret: String,
    pub student_token_ttl_secs: i64,
    pub bind_addr: String,
    pub presence: PresenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::Mongo,
            mongo_uri: "mongodb://localhost:27017/?replicaSet=rs0".to_string(),
            mongo_database: "classroom".to_string(),
            redis_uri: None,
            jwt_secret: "dev-secret-only-for-local-testing".to_string(),
            student_token_ttl_secs: 8 * 3600,
            bind_addr: "0.0.0.0:8081".to_string(),
            presence: PresenceConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Self::from_settings(&settings, &app_env)
    }

    fn from_settings(settings: &config::Config, app_env: &str) -> Result<Self, config::ConfigError> {
        let defaults = Config::default();

        let storage_backend = match settings
            .get_string("storage.backend")
            .or_else(|_| env::var("STORAGE_BACKEND"))
        {
            Ok(value) => StorageBackend::parse(&value).ok_or_else(|| {
                config::ConfigError::Message(format!("Unknown storage backend: {}", value))
            })?,
            Err(_) => defaults.storage_backend,
        };

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or(defaults.mongo_uri);

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .ok()
            .filter(|uri| !uri.trim().is_empty());

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            Err(_) => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                defaults.jwt_secret
            }
        };

        let student_token_ttl_secs = settings
            .get_int("auth.student_token_ttl_secs")
            .unwrap_or(defaults.student_token_ttl_secs)
            .max(60);

        let bind_addr = settings
            .get_string("server.bind_addr")
            .unwrap_or(defaults.bind_addr);

        let presence = PresenceConfig {
            offline_timeout_secs: read_positive(
                settings,
                "presence.offline_timeout_secs",
                defaults.presence.offline_timeout_secs,
            ),
            heartbeat_interval_secs: read_positive(
                settings,
                "presence.heartbeat_interval_secs",
                defaults.presence.heartbeat_interval_secs,
            ),
            idle_threshold_secs: read_positive(
                settings,
                "presence.idle_threshold_secs",
                defaults.presence.idle_threshold_secs,
            ),
            stream_tick_ms: read_positive(
                settings,
                "presence.stream_tick_ms",
                defaults.presence.stream_tick_ms,
            ),
        };

        Ok(Config {
            storage_backend,
            mongo_uri,
            mongo_database,
            redis_uri,
            jwt_secret,
            student_token_ttl_secs,
            bind_addr,
            presence,
        })
    }
}

fn read_positive(settings: &config::Config, key: &str, default: u64) -> u64 {
    settings
        .get_int(key)
        .ok()
        .and_then(|value| u64::try_from(value).ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
