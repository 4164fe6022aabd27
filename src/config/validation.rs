//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate route prefixes and backend URLs
//! - Validate value ranges (timeouts > 0, rates > 0, addresses parse)
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;
use crate::config::schema::ProxyConfig;
use crate::load_balancer::Backend;
use crate::routing::matcher::normalize_prefix;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("route prefix '{0}' must start with '/'")]
    RelativePrefix(String),

    #[error("route prefix '{0}' is declared more than once")]
    DuplicatePrefix(String),

    #[error("route '{prefix}': {reason}")]
    InvalidBackend { prefix: String, reason: String },

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("{field} '{value}' is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },
}

/// Check a parsed configuration, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    let mut seen = HashSet::new();
    for route in &config.routes {
        if !route.prefix.starts_with('/') {
            errors.push(ValidationError::RelativePrefix(route.prefix.clone()));
        }
        let normalized = normalize_prefix(&route.prefix);
        if !seen.insert(normalized.clone()) {
            errors.push(ValidationError::DuplicatePrefix(normalized));
        }
        for url in &route.backends {
            if let Err(e) = Backend::new(url) {
                errors.push(ValidationError::InvalidBackend {
                    prefix: route.prefix.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    if config.health_check.enabled {
        if config.health_check.interval_secs == 0 {
            errors.push(ValidationError::NotPositive { field: "health_check.interval_secs" });
        }
        if config.health_check.timeout_secs == 0 {
            errors.push(ValidationError::NotPositive { field: "health_check.timeout_secs" });
        }
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::NotPositive { field: "timeouts.connect_secs" });
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::NotPositive { field: "timeouts.request_secs" });
    }

    if config.rate_limit.enabled {
        if config.rate_limit.requests_per_second == 0 {
            errors.push(ValidationError::NotPositive { field: "rate_limit.requests_per_second" });
        }
        if config.rate_limit.burst_size == 0 {
            errors.push(ValidationError::NotPositive { field: "rate_limit.burst_size" });
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;

    fn route(prefix: &str, backends: &[&str]) -> RouteConfig {
        RouteConfig {
            prefix: prefix.to_string(),
            backends: backends.iter().map(|b| b.to_string()).collect(),
            strategy: None,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.routes.push(route("/api", &["http://a:80"]));
        config.routes.push(route("/api/", &["ftp://b"]));
        config.rate_limit.burst_size = 0;
        config.health_check.interval_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: "not-an-address".into(),
        }));
        assert!(errors.contains(&ValidationError::DuplicatePrefix("/api".into())));
        assert!(errors.contains(&ValidationError::NotPositive { field: "rate_limit.burst_size" }));
        assert!(errors.contains(&ValidationError::NotPositive { field: "health_check.interval_secs" }));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidBackend { .. })));
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn test_disabled_sections_are_not_checked() {
        let mut config = ProxyConfig::default();
        config.rate_limit.enabled = false;
        config.rate_limit.requests_per_second = 0;
        config.observability.metrics_enabled = false;
        config.observability.metrics_address = "garbage".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_backend_list_is_allowed() {
        let mut config = ProxyConfig::default();
        config.routes.push(route("/empty", &[]));
        assert!(validate_config(&config).is_ok());
    }
}
