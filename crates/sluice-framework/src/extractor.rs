//! Extractor system.
//!
//! Handler functions declare what they need as arguments; every argument
//! type implements [`FromContext`] and is pulled out of the
//! [`HandlerContext`] before the handler runs.
//!
//! | Extractor | Yields |
//! |---|---|
//! | `Arc<Interaction>` | the interaction being handled |
//! | `Arc<HandlerContext>` | the whole context |
//! | [`Origin`] | originating user and guild/channel |
//! | [`Session`] | handle onto the conversation's context session |
//! | [`Payload<T>`] | the payload deserialized into `T` |
//! | [`Lifecycle`] | timers/subscriptions scoped to the handler instance |
//! | `Option<T>` | `None` instead of failing |
//!
//! If an extractor fails the handler is not invoked and the dispatch ends
//! in `HandlerFailed`.

use std::ops::Deref;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use sluice_core::{Interaction, OriginScope, UserId};

use crate::context::{HandlerContext, Session};
use crate::error::{ExtractError, ExtractResult};
use crate::lifecycle::Lifecycle;

/// A type that can be extracted from a [`HandlerContext`].
pub trait FromContext: Sized {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self>;
}

impl FromContext for Arc<HandlerContext> {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        Ok(Arc::clone(ctx))
    }
}

impl FromContext for Arc<Interaction> {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        Ok(Arc::clone(ctx.interaction()))
    }
}

impl FromContext for Session {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        Ok(ctx.session().clone())
    }
}

impl FromContext for Lifecycle {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        Ok(ctx.lifecycle().clone())
    }
}

/// Implementation for `Option<T>` where `T: FromContext`.
///
/// Never fails; a failed inner extraction becomes `None`.
impl<T: FromContext> FromContext for Option<T> {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        Ok(T::from_context(ctx).ok())
    }
}

/// Who triggered the interaction, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub user: UserId,
    pub scope: Option<OriginScope>,
}

impl FromContext for Origin {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        let interaction = ctx.interaction();
        Ok(Self {
            user: interaction.origin_user().clone(),
            scope: interaction.origin_scope().cloned(),
        })
    }
}

/// The interaction payload, deserialized.
///
/// ```rust,ignore
/// #[derive(Deserialize)]
/// struct Feedback { values: HashMap<String, String> }
///
/// async fn on_feedback(Payload(form): Payload<Feedback>) -> String { .. }
/// ```
#[derive(Debug, Clone)]
pub struct Payload<T>(pub T);

impl<T> Deref for Payload<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: DeserializeOwned> FromContext for Payload<T> {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        let interaction = ctx.interaction();
        serde_json::from_value(interaction.payload().clone())
            .map(Payload)
            .map_err(|e| ExtractError::PayloadMismatch {
                routing_key: interaction.routing_key().to_string(),
                expected: std::any::type_name::<T>(),
                reason: e.to_string(),
            })
    }
}
