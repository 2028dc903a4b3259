//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: GatewayConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load the config file if one is given (defaults otherwise), apply process
/// environment overrides, then validate.
pub fn load(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => GatewayConfig::default(),
    };

    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay deployment environment variables onto a loaded config.
///
/// `lookup` is injected so tests do not have to mutate the process env.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = lookup("GATEWAY_BIND_ADDRESS") {
        config.listener.bind_address = addr;
    }
    if let Some(url) = lookup("CHAOS_SERVICE_URL") {
        config.chaos.service_url = url.clone();
        config.events.service_url = url.clone();
        config.services.0.insert("chaos".to_string(), url);
    }
    if let Some(url) = lookup("REDIS_URL") {
        config.rate_limit.redis_url = url;
    }
    if let Some(raw) = lookup("RATE_LIMIT_WINDOW") {
        config.rate_limit.window_ms = parse_env("RATE_LIMIT_WINDOW", raw)?;
    }
    if let Some(raw) = lookup("RATE_LIMIT_MAX_REQUESTS") {
        config.rate_limit.max_requests = parse_env("RATE_LIMIT_MAX_REQUESTS", raw)?;
    }
    if let Some(url) = lookup("USER_SERVICE_URL") {
        config.services.0.insert("users".to_string(), url.clone());
        config.services.0.insert("auth".to_string(), url);
    }
    if let Some(url) = lookup("PRODUCT_SERVICE_URL") {
        config.services.0.insert("products".to_string(), url);
    }
    if let Some(url) = lookup("ORDER_SERVICE_URL") {
        config.services.0.insert("orders".to_string(), url);
    }
    if let Some(key) = lookup("ADMIN_API_KEY") {
        config.admin.api_key = key;
        config.admin.enabled = true;
    }
    Ok(())
}

fn parse_env(var: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GatewayConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("RATE_LIMIT_WINDOW", "1000"),
                ("RATE_LIMIT_MAX_REQUESTS", "3"),
                ("CHAOS_SERVICE_URL", "http://127.0.0.1:9004"),
                ("PRODUCT_SERVICE_URL", "http://127.0.0.1:9002"),
            ]),
        )
        .unwrap();

        assert_eq!(config.rate_limit.window_ms, 1000);
        assert_eq!(config.rate_limit.max_requests, 3);
        assert_eq!(config.chaos.service_url, "http://127.0.0.1:9004");
        assert_eq!(config.events.service_url, "http://127.0.0.1:9004");
        assert_eq!(config.services.0["products"], "http://127.0.0.1:9002");
    }

    #[test]
    fn test_bad_env_number_is_rejected() {
        let mut config = GatewayConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("RATE_LIMIT_MAX_REQUESTS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_MAX_REQUESTS"));
    }

    #[test]
    fn test_load_config_from_file() {
        let path = std::env::temp_dir().join(format!("gateway-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "[listener]\nbind_address = \"127.0.0.1:4000\"\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:4000");

        fs::remove_file(&path).unwrap_or_default();
    }
}
