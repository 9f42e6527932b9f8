//! Configuration schema.
//!
//! ```toml
//! [logging]
//! level = "debug"
//! format = "pretty"
//!
//! [host]
//! name = "cloudflare-workers"
//!
//! [sessions]
//! default_ttl_secs = 900
//!
//! [webhook]
//! enabled = true
//! bind = "0.0.0.0:8080"
//! path = "/interactions"
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_core::{ConstraintProfile, profile_for};
use sluice_delivery::GatewayOptions;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SluiceConfig {
    pub logging: LoggingConfig,
    pub host: HostConfig,
    pub sessions: SessionConfig,
    pub dispatch: DispatchConfig,
    pub gateway: GatewayConfig,
    pub webhook: WebhookConfig,
    pub api: ApiConfig,
}

// =============================================================================
// Logging
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to compact without it.
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Log file, used when `output = "file"`.
    pub file_path: Option<PathBuf>,
    pub thread_ids: bool,
    /// Include file name and line number.
    pub file_location: bool,
    pub span_events: SpanEventConfig,
    /// Per-target levels, e.g. `sluice_framework = "trace"`.
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: HashMap::new(),
        }
    }
}

// =============================================================================
// Host
// =============================================================================

/// Every [`ConstraintProfile`] field, for hosts without a built-in profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileOverride {
    #[serde(default)]
    pub max_execution_time_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub supports_background_execution: bool,
    #[serde(default = "default_true")]
    pub supports_persistent_connection: bool,
    #[serde(default = "default_true")]
    pub supports_file_system: bool,
    #[serde(default)]
    pub max_concurrent_operations: Option<usize>,
}

impl ProfileOverride {
    pub fn to_profile(&self) -> ConstraintProfile {
        ConstraintProfile {
            max_execution_time: self.max_execution_time_ms.map(Duration::from_millis),
            supports_background_execution: self.supports_background_execution,
            supports_persistent_connection: self.supports_persistent_connection,
            supports_file_system: self.supports_file_system,
            max_concurrent_operations: self.max_concurrent_operations,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Host identifier. Detected from the environment when unset.
    pub name: Option<String>,
    /// Replaces the looked-up profile entirely.
    pub profile: Option<ProfileOverride>,
}

impl HostConfig {
    /// Resolves the profile: the override if present, otherwise the profile
    /// of `name` (or of `detected` when no name is configured).
    pub fn constraint_profile(&self, detected: &str) -> ConstraintProfile {
        match &self.profile {
            Some(profile) => profile.to_profile(),
            None => profile_for(self.name.as_deref().unwrap_or(detected)),
        }
    }
}

// =============================================================================
// Sessions and dispatch
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub default_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 15 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl SessionConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub dedup_window_secs: u64,
    /// How long in-flight handlers may run on after shutdown begins.
    pub shutdown_grace_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 15 * 60,
            shutdown_grace_ms: 5000,
        }
    }
}

impl DispatchConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// =============================================================================
// Transports
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub enabled: bool,
    pub url: String,
    pub token: Option<String>,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    pub defer_margin_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "wss://gateway.discord.gg/?v=10&encoding=json".to_string(),
            token: None,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            max_retries: None,
            defer_margin_ms: 500,
        }
    }
}

impl GatewayConfig {
    pub fn to_options(&self) -> GatewayOptions {
        GatewayOptions {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            max_retries: self.max_retries,
            defer_margin: Duration::from_millis(self.defer_margin_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub bind: String,
    pub path: String,
    pub response_deadline_ms: u64,
    /// Header carrying the shared secret, checked when `secret` is set.
    pub secret_header: String,
    pub secret: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "0.0.0.0:8080".to_string(),
            path: "/interactions".to_string(),
            response_deadline_ms: 2500,
            secret_header: "x-sluice-secret".to_string(),
            secret: None,
        }
    }
}

impl WebhookConfig {
    pub fn response_deadline(&self) -> Duration {
        Duration::from_millis(self.response_deadline_ms)
    }
}

/// Outbound REST API used for callbacks and follow-ups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub application_id: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://discord.com/api/v10".to_string(),
            application_id: None,
            timeout_ms: 30_000,
        }
    }
}

fn default_true() -> bool {
    true
}
