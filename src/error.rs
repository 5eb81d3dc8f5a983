//! Centralized error type for conditions that abort a connection, the DAQ
//! worker, or the process.
//!
//! Client-visible handler failures (`ERR`, `ERR: <message>`) are plain
//! strings formatted at the handler, not `AppError` values — see
//! `command_service` and `data_service`.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(String),

    #[error("DAQ link desynchronized and could not recover: {0}")]
    SyncError(String),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("configuration validation failed: {0}")]
    ConfigValidation(String),
}
