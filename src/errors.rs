//! Error types shared across the service.
//!
//! Player-visible failures (bad amounts, closed betting, busted sessions)
//! travel as `{success: false, message}` responses and never appear here.
//! These types cover the conditions that abort startup or cross the store
//! boundary.

use thiserror::Error;

/// Top-level error for service initialization and lifecycle.
#[derive(Debug, Error)]
pub enum LiftoffError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("server error: {0}")]
    Server(String),
}

/// Configuration loading and validation failures. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

pub type LiftoffResult<T> = Result<T, LiftoffError>;
