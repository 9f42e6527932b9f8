//! WebSocket transport.

#[cfg(feature = "ws-client")]
mod client;
#[cfg(feature = "ws-client")]
pub use client::{WsGatewayConfig, WsGatewayConnector};
