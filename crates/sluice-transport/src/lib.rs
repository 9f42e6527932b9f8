//! # Sluice Transport
//!
//! Concrete implementations of the transport seams defined in `sluice-core`.
//!
//! ## Features
//!
//! - `ws-client`: [`WsGatewayConnector`], the push channel over WebSocket
//! - `http-server`: [`WebhookListener`], hosts a request/response endpoint
//! - `http-client`: [`HttpOutboundApi`], callbacks and follow-ups
//! - `full`: all of the above
//!
//! The in-memory transports in [`memory`] are always available.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  Delivery strategy  │  (gateway, webhook)
//! ├─────────────────────┤
//! │  sluice-core        │  (GatewayConnector, OutboundApi, RequestHandler)
//! ├─────────────────────┤
//! │  sluice-transport   │  <- This crate
//! ├─────────────────────┤
//! │  Network (TCP/HTTP) │
//! └─────────────────────┘
//! ```

#[cfg(any(feature = "http-client", feature = "http-server"))]
pub mod http;

#[cfg(feature = "ws-client")]
pub mod websocket;

pub mod memory;

pub use memory::{MemoryGateway, OutboundCall, RecordingOutbound};

#[cfg(feature = "ws-client")]
pub use websocket::{WsGatewayConfig, WsGatewayConnector};

#[cfg(feature = "http-server")]
pub use http::{ListenerHandle, WebhookListener};

#[cfg(feature = "http-client")]
pub use http::{HttpOutboundApi, HttpOutboundConfig};
