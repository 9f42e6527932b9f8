//! Error types shared by every layer of the interaction core.
//!
//! Handler-level failures never escape the router: they are folded into
//! [`DispatchOutcome::HandlerFailed`](crate::DispatchOutcome::HandlerFailed).
//! Only [`RouterError`] is treated as unrecoverable.

use std::sync::Arc;

use thiserror::Error;

use crate::interaction::InteractionKind;

/// Boxed, thread-safe error used at handler boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Registration
// =============================================================================

/// Returned when an exact routing key is registered twice for the same kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("a {kind} handler is already registered for routing key '{routing_key}'")]
pub struct CollisionError {
    /// Kind of the rejected registration.
    pub kind: InteractionKind,
    /// The colliding routing key.
    pub routing_key: String,
}

// =============================================================================
// Transport
// =============================================================================

/// Errors raised by transport plumbing.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The endpoint that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The connection was closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// An outbound call could not be delivered.
    #[error("failed to send: {0}")]
    SendFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Delivery strategies
// =============================================================================

/// A delivery strategy failed to initialise.
///
/// Fatal to that strategy only; other strategies keep running.
#[derive(Debug, Clone, Error)]
pub enum SetupError {
    /// The host's constraint profile does not allow this strategy.
    #[error("strategy '{strategy}' is unsupported on this host: {reason}")]
    Unsupported {
        /// Strategy name.
        strategy: &'static str,
        /// Why the host rejects it.
        reason: &'static str,
    },

    /// `setup` was called on a strategy that is already running.
    #[error("strategy '{0}' is already set up")]
    AlreadySetUp(&'static str),

    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A raw transport payload could not be turned into an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// A required field is absent.
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// The kind discriminator is not an interaction kind.
    #[error("unsupported interaction type {0}")]
    UnsupportedKind(u64),

    /// The payload is not well formed.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

// =============================================================================
// Dispatch
// =============================================================================

/// Why a handler invocation failed.
///
/// Cloneable so a single outcome can be handed to every duplicate dispatch
/// of the same interaction.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("handler error: {0}")]
    Handler(Arc<dyn std::error::Error + Send + Sync>),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The handler was cancelled because the process is shutting down.
    #[error("handler cancelled by shutdown")]
    Shutdown,
}

impl HandlerError {
    /// Wraps an arbitrary handler error.
    pub fn from_boxed(err: BoxError) -> Self {
        Self::Handler(Arc::from(err))
    }
}

/// Router-level failures. These are unrecoverable and propagate to the
/// process.
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    /// The dispatch task died outside the handler boundary.
    #[error("dispatch task failed: {0}")]
    TaskFailed(String),

    /// Context store state is inconsistent.
    #[error("context store corrupted: {0}")]
    StoreCorrupted(String),
}
