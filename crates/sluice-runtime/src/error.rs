//! Runtime error types.

use sluice_core::{CollisionError, RouterError, SetupError, TransportError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building or running a [`SluiceRuntime`](crate::SluiceRuntime).
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registration rejected: {0}")]
    Collision(#[from] CollisionError),

    #[error("Strategy setup failed: {0}")]
    Setup(#[from] SetupError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The router hit an unrecoverable error while running.
    #[error("Router failed: {0}")]
    Router(#[from] RouterError),

    /// A runtime cannot be started again once it has shut down.
    #[error("Runtime has already been shut down")]
    ShutDown,

    /// A signal handler could not be installed.
    #[error("Failed to listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
