use super::{AppConfig, ConfigError, ProviderKind};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_provider(config)?;
    validate_relay(config)?;
    validate_tool(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    for origin in &server.cors_allowed_origins {
        if origin != "*" && !is_http_url(origin) {
            return Err(validation_err(format!(
                "server.cors_allowed_origins entry '{origin}' must be '*' or an http(s) origin"
            )));
        }
    }
    Ok(())
}

fn validate_provider(config: &AppConfig) -> Result<(), ConfigError> {
    let provider = &config.provider;
    if provider.api_key.trim().is_empty() {
        return Err(validation_err(format!(
            "provider '{}': api_key cannot be empty (set API_KEY)",
            provider.kind
        )));
    }
    if !is_http_url(provider.effective_base_url()) {
        return Err(validation_err(format!(
            "provider '{}': base_url must start with http:// or https://",
            provider.kind
        )));
    }
    if provider.kind == ProviderKind::Vertex {
        let has_project = provider
            .project
            .as_deref()
            .is_some_and(|project| !project.trim().is_empty());
        if !has_project {
            return Err(validation_err(
                "provider 'vertex': project is required (set VERTEX_PROJECT)",
            ));
        }
        if provider.location.trim().is_empty() {
            return Err(validation_err("provider 'vertex': location cannot be empty"));
        }
    }
    Ok(())
}

fn validate_relay(config: &AppConfig) -> Result<(), ConfigError> {
    let relay = &config.relay;
    if relay.thinking_open_tag.is_empty() || relay.thinking_close_tag.is_empty() {
        return Err(validation_err("relay thinking tags cannot be empty"));
    }
    if relay.thinking_open_tag == relay.thinking_close_tag {
        return Err(validation_err(
            "relay.thinking_open_tag and relay.thinking_close_tag must differ",
        ));
    }
    if relay.retry_max_attempts == 0 {
        return Err(validation_err("relay.retry_max_attempts must be at least 1"));
    }
    if relay.system_prompt.trim().is_empty() {
        return Err(validation_err("relay.system_prompt cannot be empty"));
    }
    Ok(())
}

fn validate_tool(config: &AppConfig) -> Result<(), ConfigError> {
    let tool = &config.tool;
    if !tool.enabled {
        return Ok(());
    }
    if tool.name.trim().is_empty() {
        return Err(validation_err("tool.name cannot be empty"));
    }
    match tool.endpoint.as_deref() {
        Some(endpoint) if is_http_url(endpoint) => {}
        Some(_) => {
            return Err(validation_err(
                "tool.endpoint must start with http:// or https://",
            ))
        }
        None => {
            return Err(validation_err(
                "tool.enabled requires tool.endpoint (set SEARCH_ENDPOINT)",
            ))
        }
    }
    if tool.timeout_secs == 0 {
        return Err(validation_err("tool.timeout_secs must be greater than 0"));
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &[
    "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "TRACE", "DISABLED",
];

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level '{}' is invalid. Must be one of: {}",
            config.features.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, ToolConfig};

    fn valid_config() -> AppConfig {
        AppConfig {
            provider: ProviderConfig {
                api_key: "key".into(),
                ..ProviderConfig::default()
            },
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_valid_default_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_rejects_empty_api_key() {
        let mut config = valid_config();
        config.provider.api_key = "  ".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_vertex_without_project() {
        let mut config = valid_config();
        config.provider.kind = ProviderKind::Vertex;
        assert!(validate_config(&config).is_err());
        config.provider.project = Some("brain-studio".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_identical_thinking_tags() {
        let mut config = valid_config();
        config.relay.thinking_close_tag = config.relay.thinking_open_tag.clone();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_retry_attempts() {
        let mut config = valid_config();
        config.relay.retry_max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_tool_requires_endpoint_when_enabled() {
        let mut config = valid_config();
        config.tool = ToolConfig {
            enabled: true,
            ..ToolConfig::default()
        };
        assert!(validate_config(&config).is_err());
        config.tool.endpoint = Some("ftp://docs".into());
        assert!(validate_config(&config).is_err());
        config.tool.endpoint = Some("http://127.0.0.1:7000/search".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_bad_origin_and_log_level() {
        let mut config = valid_config();
        config.server.cors_allowed_origins = vec!["example.com".into()];
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.features.log_level = "LOUD".into();
        assert!(validate_config(&config).is_err());
    }
}
