//! HTTP transport.
//!
//! The server side hosts the request/response channel; the client side is
//! the outbound API used for callbacks and follow-ups.

#[cfg(feature = "http-client")]
mod client;
#[cfg(feature = "http-client")]
pub use client::{HttpOutboundApi, HttpOutboundConfig};

#[cfg(feature = "http-server")]
mod server;
#[cfg(feature = "http-server")]
pub use server::{ListenerHandle, WebhookListener};
