//! # Sluice Delivery
//!
//! Delivery strategies: the transport-specific halves of the interaction
//! core that turn raw events into [`Interaction`](sluice_core::Interaction)s
//! and outcomes back into replies.
//!
//! | Strategy | Transport | Reply path |
//! |---|---|---|
//! | [`GatewayStrategy`] | persistent push channel | outbound API call |
//! | [`WebhookStrategy`] | one HTTP request per interaction | synchronous reply, follow-up when deferred |
//!
//! Both share the JSON [`InteractionCodec`].
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use sluice_delivery::{GatewayStrategy, WebhookStrategy};
//! use sluice_transport::{MemoryGateway, RecordingOutbound};
//!
//! let gateway = GatewayStrategy::new(Arc::new(MemoryGateway::new()), Arc::new(RecordingOutbound::new()));
//! gateway.setup(Arc::new(router.clone())).await?;
//!
//! let webhook = Arc::new(WebhookStrategy::new());
//! webhook.setup(Arc::new(router)).await?;
//! let reply = webhook.handle(raw_request).await;
//! ```

pub mod codec;
pub mod gateway;
pub mod model;
pub mod webhook;

pub use codec::{FallbackMessages, InteractionCodec};
pub use gateway::{GatewayOptions, GatewayStrategy};
pub use webhook::{
    DEFAULT_RESPONSE_DEADLINE, SharedSecretVerifier, SignatureVerifier, WebhookStrategy,
};
