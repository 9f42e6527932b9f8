//! Configuration for the Sluice runtime.
//!
//! Layered loading through figment, a serde schema with one section per
//! concern, and validation of the values the core cannot run with.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ApiConfig, DispatchConfig, GatewayConfig, HostConfig, LogFormat, LogLevel, LogOutput,
    LoggingConfig, ProfileOverride, SessionConfig, SluiceConfig, SpanEventConfig, WebhookConfig,
};
pub use validation::validate_config;
