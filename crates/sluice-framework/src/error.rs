//! Error types for the Sluice framework.

use thiserror::Error;

/// Errors that can occur while extracting handler arguments.
///
/// A failed extraction fails the dispatch with
/// [`HandlerFailed`](sluice_core::DispatchOutcome::HandlerFailed).
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The payload could not be deserialized into the requested type.
    #[error("payload of '{routing_key}' does not match '{expected}': {reason}")]
    PayloadMismatch {
        /// Routing key of the interaction.
        routing_key: String,
        /// Requested type name.
        expected: &'static str,
        /// Deserializer message.
        reason: String,
    },

    /// Custom extraction error.
    #[error("{0}")]
    Custom(String),
}

impl ExtractError {
    /// Creates a custom extraction error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Errors returned by context store mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No live session has this id (never created, cleared or expired).
    #[error("session '{0}' not found or expired")]
    NotFound(String),
}
