//! Configuration with defaults, optional TOML file, and environment
//! overrides.
//!
//! Precedence: defaults < config file < environment. The store section
//! describes the external key-value store; `MemoryStore` deployments only
//! use the timeouts, Redis-backed deployments consume all of it.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Complete service configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub game: GameConfig,
    pub hub: HubConfig,
}

/// HTTP/WebSocket listener configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

/// External key-value store connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub password: String,
    pub db: i64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "localhost:6379".to_string(),
            password: String::new(),
            db: 0,
            read_timeout_secs: 3,
            write_timeout_secs: 3,
        }
    }
}

/// Round engine and instant-engine tunables.
///
/// Durations are configurable so tests can shrink a full round into tens of
/// milliseconds; production values match the documented game flow.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub min_bet: f64,
    pub max_bet: f64,
    pub betting_time_ms: u64,
    pub tick_interval_ms: u64,
    pub inter_round_pause_ms: u64,
    pub bet_queue_capacity: usize,
    pub cashout_queue_capacity: usize,
    pub bet_reply_timeout_ms: u64,
    pub cashout_reply_timeout_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_bet: 1.0,
            max_bet: 10_000.0,
            betting_time_ms: 5_000,
            tick_interval_ms: 100,
            inter_round_pause_ms: 3_000,
            bet_queue_capacity: 1_000,
            cashout_queue_capacity: 1_000,
            bet_reply_timeout_ms: 5_000,
            cashout_reply_timeout_ms: 500,
        }
    }
}

impl GameConfig {
    pub fn betting_time(&self) -> Duration {
        Duration::from_millis(self.betting_time_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn inter_round_pause(&self) -> Duration {
        Duration::from_millis(self.inter_round_pause_ms)
    }

    pub fn bet_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.bet_reply_timeout_ms)
    }

    pub fn cashout_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.cashout_reply_timeout_ms)
    }
}

/// Broadcast hub tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub broadcast_capacity: usize,
    pub session_queue_capacity: usize,
    pub write_timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 100,
            session_queue_capacity: 64,
            write_timeout_secs: 10,
        }
    }
}

impl HubConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Loads configuration from an optional TOML file plus environment
/// overrides, then validates it.
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Resolve the file path from `LIFTOFF_CONFIG` when none was given.
    pub fn from_env() -> Self {
        let mut loader = Self::new();
        if let Ok(path) = env::var("LIFTOFF_CONFIG") {
            loader.config_path = Some(path);
        }
        loader
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            AppConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> Result<AppConfig, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::LoadFailed(format!("failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("LIFTOFF_HOST") {
            config.server.host = host;
        }
        // PORT is the conventional deployment variable; LIFTOFF_PORT wins
        // when both are set.
        for key in ["PORT", "LIFTOFF_PORT"] {
            if let Ok(port) = env::var(key) {
                config.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                    field: key.to_string(),
                    value: port,
                    reason: "invalid port number".to_string(),
                })?;
            }
        }

        if let Ok(url) = env::var("REDIS_URL") {
            config.store.url = url;
        }
        if let Ok(password) = env::var("REDIS_PASSWORD") {
            config.store.password = password;
        }
        if let Ok(db) = env::var("REDIS_DB") {
            config.store.db = db.parse().map_err(|_| ConfigError::InvalidValue {
                field: "REDIS_DB".to_string(),
                value: db,
                reason: "invalid database index".to_string(),
            })?;
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::InvalidValue {
            field: "server.port".to_string(),
            value: "0".to_string(),
            reason: "port cannot be zero".to_string(),
        });
    }

    if config.game.min_bet <= 0.0 || config.game.min_bet >= config.game.max_bet {
        return Err(ConfigError::InvalidValue {
            field: "game.min_bet".to_string(),
            value: config.game.min_bet.to_string(),
            reason: "must be positive and below max_bet".to_string(),
        });
    }

    if config.game.tick_interval_ms == 0 {
        return Err(ConfigError::InvalidValue {
            field: "game.tick_interval_ms".to_string(),
            value: "0".to_string(),
            reason: "ticker cannot run at zero interval".to_string(),
        });
    }

    if config.game.bet_queue_capacity == 0 || config.game.cashout_queue_capacity == 0 {
        return Err(ConfigError::InvalidValue {
            field: "game.bet_queue_capacity".to_string(),
            value: "0".to_string(),
            reason: "request queues must be bounded but non-empty".to_string(),
        });
    }

    if config.hub.broadcast_capacity == 0 {
        return Err(ConfigError::InvalidValue {
            field: "hub.broadcast_capacity".to_string(),
            value: "0".to_string(),
            reason: "broadcast intake must have capacity".to_string(),
        });
    }

    Ok(())
}
