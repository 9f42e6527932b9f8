//! Seams between delivery strategies and the dispatch router.
//!
//! | Trait | Implemented by | Called by |
//! |---|---|---|
//! | [`Dispatch`] | the router | delivery strategies |
//! | [`DeliveryStrategy`] | push-channel / request-response strategies | the runtime |
//! | [`WireCodec`] | per wire format | delivery strategies |

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::constraint::ConstraintProfile;
use crate::error::{NormalizeError, RouterError, SetupError};
use crate::interaction::{Interaction, InteractionId};
use crate::outcome::DispatchOutcome;
use crate::scope::ScopeSet;

/// Routes canonical interactions to handlers.
///
/// Use `Arc<dyn Dispatch>` to hand the router to delivery strategies.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Dispatches one interaction and returns its single outcome.
    ///
    /// `Err` is reserved for unrecoverable router failures; every handler
    /// level problem is an `Ok` outcome.
    async fn dispatch(&self, interaction: Interaction) -> Result<DispatchOutcome, RouterError>;

    /// Stops the handler still running for `id`, because nobody will
    /// receive its reply. The dispatch resolves to
    /// [`ConstraintViolation::BackgroundExecutionUnavailable`](crate::ConstraintViolation::BackgroundExecutionUnavailable).
    ///
    /// Returns `false` if nothing was running for `id`.
    fn abandon(&self, id: &InteractionId) -> bool;

    /// The constraint profile dispatches run under.
    fn profile(&self) -> ConstraintProfile;

    /// Union of the scopes every registered handler needs.
    fn required_scopes(&self) -> ScopeSet;
}

/// Shared dispatcher handle.
pub type BoxedDispatch = Arc<dyn Dispatch>;

/// A transport-specific adapter that produces interactions and consumes
/// their outcomes.
///
/// Strategies are configured at construction; `setup` only wires them to a
/// dispatcher and opens whatever the transport needs.
#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Starts delivering interactions to `dispatch`.
    async fn setup(&self, dispatch: BoxedDispatch) -> Result<(), SetupError>;

    /// Stops intake and releases transport resources. Safe to call twice.
    ///
    /// Must not wait for in-flight dispatches: the router is only shut down
    /// after every strategy is torn down.
    async fn teardown(&self);

    /// Waits until replies owed for already dispatched interactions have
    /// been sent. Called once the router has shut down, so every pending
    /// dispatch has resolved.
    async fn drain(&self) {}
}

/// Shared strategy handle.
pub type BoxedStrategy = Arc<dyn DeliveryStrategy>;

/// Translates between a transport's raw shapes and the canonical model.
pub trait WireCodec: Send + Sync {
    /// Raw inbound event.
    type Raw;
    /// Raw reply produced for an outcome.
    type Reply;

    /// Builds an interaction from a raw event received at `received_at`.
    fn normalize(&self, raw: Self::Raw, received_at: Instant) -> Result<Interaction, NormalizeError>;

    /// Turns the outcome of `interaction` into a raw reply.
    fn denormalize(&self, interaction: &Interaction, outcome: &DispatchOutcome) -> Self::Reply;
}
