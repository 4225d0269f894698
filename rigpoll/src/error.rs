//! Common error types for rigpoll.
//!
//! Errors raised while registering tasks or loading configuration live here.
//! Failures that happen during a poll never surface as `Error`; they are
//! recorded in the affected [`Exchange`](crate::exchange::Exchange) instead.

use thiserror::Error;

use crate::device::SettingError;

/// Main error type for rigpoll operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file is not valid TOML or does not match the layout
    #[error("Configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    /// One task of a batch failed validation; the whole batch is rejected.
    #[error("task '{id}' error in settings ({reason})")]
    InvalidTask {
        id: String,
        #[source]
        reason: TaskError,
    },

    /// Two tasks of a batch share an identifier.
    #[error("duplicate task id '{0}'")]
    DuplicateTask(String),
}

/// Reasons a single task specification is rejected at registration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("miner = '{0}' not supported")]
    UnknownVendor(String),

    #[error("request = '{request}' not supported by {vendor}")]
    UnknownRequest { vendor: String, request: String },

    #[error("no requests given")]
    NoRequests,

    #[error(transparent)]
    Setting(#[from] SettingError),

    #[error("pool = '{0}' not supported")]
    UnknownPool(String),

    #[error("coin '{coin}' not supported by {pool}")]
    UnknownCoin { pool: String, coin: String },

    #[error("query '{query}' not supported by {pool}")]
    UnknownQuery { pool: String, query: String },

    #[error("{query}() missing required argument '{argument}'")]
    MissingArgument { query: String, argument: &'static str },

    #[error("{query}() got an unexpected argument '{argument}'")]
    UnexpectedArgument { query: String, argument: &'static str },

    #[error("request period '{0}' must be in (1, 3, 6, 12, 24)")]
    InvalidHours(u32),

    #[error("invalid account '{0}'")]
    InvalidAccount(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
