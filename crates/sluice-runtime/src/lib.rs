//! Sluice Runtime: orchestration layer of the Sluice interaction core.
//!
//! This crate provides:
//! - Runtime orchestration ([`SluiceRuntime`])
//! - Layered configuration ([`config`])
//! - Host detection and constraint profile selection ([`host`])
//! - Logging setup ([`logging`])
//!
//! # Strategies from configuration
//!
//! Enabled sections of the configuration become delivery strategies when
//! the matching cargo feature is on:
//!
//! - `[gateway]` with `ws-client` (and `http-client` for replies)
//! - `[webhook]`, bound to a listener with `http-server`
//!
//! ```ignore
//! use sluice_runtime::SluiceRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = SluiceRuntime::new();
//!     runtime.register(on_command("ping").handler(|| async { "pong" }))?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! Strategies built by hand are added with
//! [`RuntimeBuilder::strategy`] or [`SluiceRuntime::add_strategy`].

pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, SluiceConfig, load_config};
pub use error::{RuntimeError, RuntimeResult};
pub use host::detect_host;
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, SluiceRuntime};

pub use tracing;
pub use tracing_subscriber;

/// Logging macros and span helpers.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
