//! Configuration validation.

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    DispatchConfig, GatewayConfig, HostConfig, SessionConfig, SluiceConfig, WebhookConfig,
};
use sluice_core::ACK_WINDOW;

/// Validates the entire configuration.
pub fn validate_config(config: &SluiceConfig) -> ConfigResult<()> {
    validate_host_config(&config.host)?;
    validate_session_config(&config.sessions)?;
    validate_dispatch_config(&config.dispatch)?;
    validate_gateway_config(&config.gateway)?;
    validate_webhook_config(&config.webhook)?;
    validate_url(&config.api.base_url, "http")?;
    Ok(())
}

fn validate_host_config(host: &HostConfig) -> ConfigResult<()> {
    if let Some(name) = &host.name
        && name.trim().is_empty()
    {
        return Err(ConfigError::validation("Host name cannot be blank"));
    }

    if let Some(profile) = &host.profile {
        if profile.max_concurrent_operations == Some(0) {
            return Err(ConfigError::validation(
                "max_concurrent_operations must be greater than 0 when set",
            ));
        }
        if profile.max_execution_time_ms == Some(0) {
            return Err(ConfigError::validation(
                "max_execution_time_ms must be greater than 0 when set",
            ));
        }
    }

    Ok(())
}

fn validate_session_config(sessions: &SessionConfig) -> ConfigResult<()> {
    if sessions.default_ttl_secs == 0 {
        return Err(ConfigError::validation(
            "Session TTL must be greater than 0",
        ));
    }
    if sessions.sweep_interval_secs == 0 {
        return Err(ConfigError::validation(
            "Session sweep interval must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_dispatch_config(dispatch: &DispatchConfig) -> ConfigResult<()> {
    if dispatch.dedup_window_secs == 0 {
        return Err(ConfigError::validation(
            "Dedup window must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_gateway_config(gateway: &GatewayConfig) -> ConfigResult<()> {
    if gateway.initial_delay_ms == 0 {
        return Err(ConfigError::validation(
            "Initial retry delay must be greater than 0",
        ));
    }

    if gateway.max_delay_ms < gateway.initial_delay_ms {
        return Err(ConfigError::validation(
            "Max retry delay must be greater than or equal to initial delay",
        ));
    }

    if gateway.backoff_multiplier < 1.0 {
        return Err(ConfigError::validation(
            "Backoff multiplier must be at least 1.0",
        ));
    }

    if !gateway.enabled {
        return Ok(());
    }

    validate_url(&gateway.url, "ws")?;
    match gateway.token.as_deref() {
        Some(token) if !token.is_empty() => Ok(()),
        _ => Err(ConfigError::missing_field("gateway.token")),
    }
}

fn validate_webhook_config(webhook: &WebhookConfig) -> ConfigResult<()> {
    validate_path(&webhook.path)?;

    let window = ACK_WINDOW.as_millis() as u64;
    if webhook.response_deadline_ms == 0 || webhook.response_deadline_ms > window {
        return Err(ConfigError::validation(format!(
            "Webhook response deadline must be between 1 and {window} ms"
        )));
    }

    if webhook.enabled && webhook.bind.is_empty() {
        return Err(ConfigError::missing_field("webhook.bind"));
    }

    if webhook.secret.is_some() && webhook.secret_header.is_empty() {
        return Err(ConfigError::missing_field("webhook.secret_header"));
    }

    Ok(())
}

fn validate_url(url: &str, expected_scheme: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("url"));
    }

    let valid_schemes = match expected_scheme {
        "ws" => ["ws://", "wss://"],
        "http" => ["http://", "https://"],
        _ => return Err(ConfigError::validation("Unknown URL scheme type")),
    };

    if !valid_schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {valid_schemes:?}"),
        ));
    }

    Ok(())
}

fn validate_path(path: &str) -> ConfigResult<()> {
    if path.is_empty() {
        return Err(ConfigError::missing_field("webhook.path"));
    }

    if !path.starts_with('/') {
        return Err(ConfigError::validation("Path must start with '/'"));
    }

    Ok(())
}
