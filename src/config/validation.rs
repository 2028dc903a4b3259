//! Configuration validation.
//!
//! Serde handles syntax; this pass checks value ranges and that every
//! downstream service URL is usable. All violations are reported, not just
//! the first.

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::chaos::injector::INJECTED_TIMEOUT;
use crate::config::schema::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a socket address")]
    BindAddress(String),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("timeouts.request_secs ({0}s) must exceed the injected chaos timeout ({1}s)")]
    RequestTimeoutTooShort(u64, u64),

    #[error("{field} '{value}' is not a valid http(s) URL")]
    Url { field: String, value: String },

    #[error("service label '{0}' must be a single non-empty path segment")]
    ServiceLabel(String),

    #[error("observability.log_format must be 'pretty' or 'json', got '{0}'")]
    LogFormat(String),

    #[error("admin.api_key must be set when the admin surface is enabled")]
    AdminKey,
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    let positive: [(&'static str, u64); 7] = [
        ("timeouts.upstream_secs", config.timeouts.upstream_secs),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("chaos.sync_interval_secs", config.chaos.sync_interval_secs),
        ("chaos.request_timeout_secs", config.chaos.request_timeout_secs),
        ("chaos.max_attempts", u64::from(config.chaos.max_attempts)),
        ("rate_limit.window_ms", config.rate_limit.window_ms),
        ("rate_limit.max_requests", config.rate_limit.max_requests),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }
    if config.events.queue_capacity == 0 {
        errors.push(ValidationError::Zero { field: "events.queue_capacity" });
    }

    let injected = INJECTED_TIMEOUT.as_secs();
    if config.timeouts.request_secs <= injected {
        errors.push(ValidationError::RequestTimeoutTooShort(
            config.timeouts.request_secs,
            injected,
        ));
    }

    if config.chaos.sync_enabled {
        check_url(&mut errors, "chaos.service_url", &config.chaos.service_url);
    }
    if config.events.enabled {
        check_url(&mut errors, "events.service_url", &config.events.service_url);
    }

    for (label, url) in &config.services.0 {
        if label.is_empty() || label.contains('/') {
            errors.push(ValidationError::ServiceLabel(label.clone()));
        }
        check_url(&mut errors, &format!("services.{label}"), url);
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::LogFormat(config.observability.log_format.clone()));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::AdminKey);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    let valid = Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
        .unwrap_or(false);
    if !valid {
        errors.push(ValidationError::Url {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn test_reports_every_violation() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.rate_limit.max_requests = 0;
        config.timeouts.request_secs = 10;
        config
            .services
            .0
            .insert("bad/label".into(), "ftp://files".into());

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::BindAddress("nowhere".into())));
        assert!(errors.contains(&ValidationError::Zero { field: "rate_limit.max_requests" }));
        assert!(errors.contains(&ValidationError::RequestTimeoutTooShort(10, 30)));
        assert!(errors.contains(&ValidationError::ServiceLabel("bad/label".into())));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::Url { field, .. } if field == "services.bad/label")));
    }
}
