//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;
use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    let config: ProxyConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;

    const SAMPLE: &str = r#"
[listener]
bind_address = "127.0.0.1:8080"

[[routes]]
prefix = "/api/users"
backends = ["http://127.0.0.1:8081", "http://127.0.0.1:8082"]
strategy = "least_active"

[[routes]]
prefix = "/api/posts"
backends = ["http://127.0.0.1:8091"]

[health_check]
interval_secs = 1
path = "/healthz"

[rate_limit]
requests_per_second = 50
burst_size = 100

[observability]
log_format = "json"
metrics_enabled = false
"#;

    #[test]
    fn test_parse_sample() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:8080");
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].strategy.as_deref(), Some("least_active"));
        assert_eq!(config.routes[1].strategy, None);
        assert_eq!(config.health_check.interval_secs, 1);
        assert_eq!(config.health_check.timeout_secs, 2);
        assert_eq!(config.health_check.path, "/healthz");
        assert_eq!(config.rate_limit.burst_size, 100);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert!(config.admin.enabled);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.routes.is_empty());
        assert_eq!(config.rate_limit.requests_per_second, 5);
        assert_eq!(config.rate_limit.burst_size, 10);
        assert_eq!(config.health_check.interval_secs, 5);
    }

    #[test]
    fn test_malformed_document() {
        let err = parse_config("[[routes]]\nprefix = 12").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_document() {
        let err = parse_config("[[routes]]\nprefix = \"api\"\nbackends = [\"nope\"]").unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
