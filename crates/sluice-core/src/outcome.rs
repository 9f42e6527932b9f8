//! The single result of dispatching one interaction.

use std::fmt;
use std::time::Duration;

use crate::error::HandlerError;
use crate::response::Response;

/// Why a dispatch was rejected by the host's constraint profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintViolation {
    /// The handler's declared or estimated duration is above the host limit.
    ExpectedDurationExceedsLimit {
        /// Declared or estimated duration.
        expected: Duration,
        /// The host's execution ceiling.
        limit: Duration,
    },
    /// The handler ran past the host's execution ceiling.
    ExecutionTimeExceeded {
        /// The host's execution ceiling.
        limit: Duration,
    },
    /// The handler did not finish before the ack deadline.
    AckDeadlineMissed,
    /// A reply could not be deferred because work cannot outlive the request.
    BackgroundExecutionUnavailable,
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExpectedDurationExceedsLimit { expected, limit } => write!(
                f,
                "expected duration {expected:?} exceeds execution limit {limit:?}"
            ),
            Self::ExecutionTimeExceeded { limit } => {
                write!(f, "execution exceeded limit {limit:?}")
            }
            Self::AckDeadlineMissed => f.write_str("ack deadline missed"),
            Self::BackgroundExecutionUnavailable => {
                f.write_str("background execution unavailable on this host")
            }
        }
    }
}

/// Exactly one of these is produced per interaction.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// The handler answered.
    Handled(Response),
    /// No handler is registered for the interaction.
    NoMatch,
    /// The handler failed; the error is kept for observability.
    HandlerFailed(HandlerError),
    /// Host limits prevented a response.
    ConstraintViolated(ConstraintViolation),
}

impl DispatchOutcome {
    /// Returns the response if the dispatch was handled.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Handled(response) => Some(response),
            _ => None,
        }
    }

    /// Returns `true` for [`DispatchOutcome::Handled`].
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled(_))
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Handled(_) => "handled",
            Self::NoMatch => "no_match",
            Self::HandlerFailed(_) => "handler_failed",
            Self::ConstraintViolated(_) => "constraint_violated",
        }
    }
}
