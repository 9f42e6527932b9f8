//! # Sluice
//!
//! Interaction dispatch and registration core for bot platforms.
//!
//! ## Overview
//!
//! Sluice receives interactions (slash commands, button presses, form
//! submissions, autocomplete queries) over either a persistent push channel
//! or one webhook request per interaction, routes each to exactly one
//! registered handler, and keeps multi-step conversations together through
//! TTL-bound context sessions. The same handlers run on a long-lived server
//! and on serverless hosts; the host's [`ConstraintProfile`](core::ConstraintProfile)
//! decides how replies are delivered.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐               ┌──────────┐     ┌──────────────────┐
//! │ GatewayStrategy  │──Interaction─▶│          │────▶│ Handler "ping"   │
//! │ (push channel)   │               │  Router  │────▶│ Handler "setup"  │
//! ├──────────────────┤               │          │────▶│ Handler ...      │
//! │ WebhookStrategy  │◀───Outcome────│          │     └──────────────────┘
//! │ (request/reply)  │               └────┬─────┘
//! └──────────────────┘                    │
//!                                 ┌───────┴────────┐
//!                                 │ ContextStore   │ sessions, lineage
//!                                 │ Lifecycle      │ timers, subscriptions
//!                                 └────────────────┘
//! ```
//!
//! - **Runtime**: configuration, host detection, strategy setup and ordered shutdown
//! - **Strategies**: wire normalization and reply delivery per transport
//! - **Router**: resolution, constraint enforcement, idempotent dispatch
//! - **Handlers**: async functions with extractor arguments (axum-style)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sluice::prelude::*;
//!
//! async fn setup(ctx: Arc<HandlerContext>, session: Session) -> Result<Response, SessionError> {
//!     session.insert("step", "form")?;
//!     Ok(Response::form(ctx.chained_key("setup_form"), "Setup", json!([])))
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = SluiceRuntime::new();
//!     runtime.register(on_command("setup").handler(setup))?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` / `yaml-config`: configuration file formats
//! - `json-log`: JSON log output
//! - `ws-client`: push channel over WebSocket
//! - `http-server`: webhook listener
//! - `http-client`: outbound callbacks and follow-ups

pub use sluice_core as core;
pub use sluice_delivery as delivery;
pub use sluice_framework as framework;
pub use sluice_runtime as runtime;
pub use sluice_transport as transport;

/// Commonly used types for building interaction handlers.
///
/// ```rust,ignore
/// use sluice::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use sluice_runtime::{RuntimeBuilder, SluiceRuntime};

    // Canonical model
    pub use sluice_core::{
        Choice, ConstraintProfile, DispatchOutcome, Host, Interaction, InteractionKind, Response,
        Scope,
    };

    // Handlers and extractors
    pub use sluice_framework::{
        HandlerContext, Lifecycle, Origin, Payload, Regex, Session, SessionError,
    };

    // Registration builders
    pub use sluice_framework::{
        on_autocomplete, on_autocomplete_matching, on_command, on_command_matching,
        on_component, on_component_matching, on_form_submit, on_form_submit_matching,
    };

    // Strategies
    pub use sluice_delivery::{GatewayStrategy, WebhookStrategy};

    pub use std::sync::Arc;
}
