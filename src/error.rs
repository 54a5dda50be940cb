//! Custom error types for the pipeline.
//!
//! This module defines the primary error type, `PipelineError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failures a stage can observe, from configuration issues to storage commits.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type
//!   mismatches in the TOML file or environment overrides.
//! - **`Configuration`**: Semantic errors that pass parsing but are logically wrong
//!   (a zero ring capacity, two stages sharing one channel id).
//! - **`Io`**: Wraps `std::io::Error` for ring backing files and log files.
//! - **`Device`**: The input device could not be claimed. This is the only fatal
//!   startup error; the capture stage never runs without its device.
//! - **`Storage`**: A commit, read-back or erase against the storage collaborator
//!   failed. Transient: the sink keeps its pending bytes and retries next window.
//! - **`RingLayout`**: A shared ring region failed header validation on attach.
//! - **`ChannelClosed`**: The peer end of a call channel has gone away.
//! - **`Task`**: A stage task panicked or was cancelled before reporting.
//!
//! None of these cross a stage boundary. A stage observes its own failures, logs
//! them and either continues or halts itself.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, PipelineError>;

/// Errors raised inside a single pipeline stage.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration could not be loaded or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but is not usable.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input device could not be claimed.
    #[error("Input device error: {0}")]
    Device(String),

    /// Storage collaborator reported a failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Shared ring region has an unexpected layout.
    #[error("Ring layout error: {0}")]
    RingLayout(String),

    /// The other side of a call channel is gone.
    #[error("Channel {0} closed")]
    ChannelClosed(u8),

    /// A stage task panicked or was cancelled.
    #[error("Stage task failed: {0}")]
    Task(String),
}

impl From<figment::Error> for PipelineError {
    fn from(value: figment::Error) -> Self {
        Self::Config(Box::new(value))
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Task(value.to_string())
    }
}
