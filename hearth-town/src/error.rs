//! Error types for the town layer.

use thiserror::Error;

/// Errors raised while loading or driving a town.
#[derive(Error, Debug)]
pub enum TownError {
    /// An engine operation failed.
    #[error(transparent)]
    Engine(#[from] hearth_core::EngineError),

    /// Model client construction or prompt loading failed.
    #[error(transparent)]
    Llm(#[from] hearth_llm::LlmError),

    /// Malformed or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The tracing subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),

    /// Checkpoint encoding failed.
    #[error("checkpoint encoding failed: {0}")]
    Checkpoint(#[from] rmp_serde::encode::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, TownError>;
