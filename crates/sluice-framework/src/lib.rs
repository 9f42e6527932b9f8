//! # Sluice Framework
//!
//! Handler system and dispatch machinery of the Sluice interaction core.
//!
//! ## Components
//!
//! - **Registry** ([`HandlerRegistry`]): routable handlers, collision
//!   detection, inferred subscription scopes
//! - **Context store** ([`ContextStore`]): sessions shared by chained
//!   interactions, with TTL expiry and lineage links
//! - **Router** ([`Router`]): resolves, enforces the constraint profile,
//!   invokes, and produces one [`DispatchOutcome`](sluice_core::DispatchOutcome)
//!   per interaction
//! - **Lifecycle** ([`LifecycleManager`]): timers and subscriptions per
//!   handler instance, released on deregistration and shutdown
//! - **Handlers** ([`handler`], [`extractor`], [`routing`]): async functions
//!   with extractor arguments, wrapped as tower services
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use sluice_framework::*;
//!
//! let lifecycle = Arc::new(LifecycleManager::new());
//! let registry = Arc::new(HandlerRegistry::new(lifecycle));
//! registry.register(on_command("ping").handler(|| async { "pong" }))?;
//!
//! let router = Router::new(registry, Arc::new(ContextStore::default()), profile);
//! let outcome = router.dispatch(interaction).await?;
//! ```

pub mod context;
pub mod error;
pub mod estimator;
pub mod extractor;
pub mod handler;
pub mod lifecycle;
pub mod registry;
pub mod router;
pub mod routing;
pub mod store;

pub use context::{HandlerContext, Session};
pub use error::{ExtractError, ExtractResult, SessionError};
pub use estimator::{DEFAULT_RETRY_AFTER, DurationEstimator};
pub use extractor::{FromContext, Origin, Payload};
pub use handler::{BoxHandlerService, Handler, HandlerService, IntoResponse};
pub use lifecycle::{InstanceId, Lifecycle, LifecycleManager};
pub use registry::{HandlerRegistration, HandlerRegistry, RoutingKey};
pub use router::{DEFAULT_DEDUP_WINDOW, Router, RouterOptions};
pub use routing::{
    RegistrationBuilder, on_autocomplete, on_autocomplete_matching, on_command,
    on_command_matching, on_component, on_component_matching, on_form_submit,
    on_form_submit_matching,
};
pub use store::{ContextSession, ContextStore, CorrelationId, DEFAULT_SESSION_TTL};

pub use regex::Regex;
