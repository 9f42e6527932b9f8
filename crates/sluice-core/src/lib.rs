//! # Sluice Core
//!
//! The canonical model of the Sluice interaction core.
//!
//! This crate holds the types every other layer agrees on, and the seam
//! traits that let delivery strategies and the dispatch router be built
//! independently of one another.
//!
//! ## Layers
//!
//! - **Model**: [`Interaction`], [`Response`], [`DispatchOutcome`]
//! - **Host limits**: [`ConstraintProfile`] and [`profile_for`]
//! - **Subscriptions**: [`Scope`] / [`ScopeSet`] and [`infer_scopes`]
//! - **Seams**: [`Dispatch`] (implemented by the router),
//!   [`DeliveryStrategy`] / [`WireCodec`] (implemented per transport),
//!   [`GatewayConnector`] / [`OutboundApi`] / [`RequestHandler`]
//!   (implemented by the transport layer)
//!
//! ## Flow
//!
//! ```text
//! ┌───────────────────┐   Interaction   ┌──────────┐   ┌─────────┐
//! │ Delivery strategy │────────────────▶│  Router  │──▶│ Handler │
//! │ (gateway/webhook) │◀────────────────│          │◀──│         │
//! └───────────────────┘ DispatchOutcome └──────────┘   └─────────┘
//! ```

pub mod constraint;
pub mod error;
pub mod interaction;
pub mod outcome;
pub mod response;
pub mod scope;
pub mod strategy;
pub mod transport;

pub use constraint::{ConstraintProfile, Host, profile_for};
pub use error::{
    BoxError, CollisionError, HandlerError, NormalizeError, RouterError, SetupError,
    TransportError, TransportResult,
};
pub use interaction::{
    ACK_WINDOW, Interaction, InteractionBuilder, InteractionId, InteractionKind,
    LINEAGE_SEPARATOR, OriginScope, UserId, split_lineage,
};
pub use outcome::{ConstraintViolation, DispatchOutcome};
pub use response::{Choice, FormBody, MessageBody, Response};
pub use scope::{Scope, ScopeSet, infer_scopes};
pub use strategy::{BoxedDispatch, BoxedStrategy, DeliveryStrategy, Dispatch, WireCodec};
pub use transport::{
    EventStream, GatewayConnector, OutboundApi, RawRequest, RawResponse, ReplyStatus,
    RequestHandler,
};
