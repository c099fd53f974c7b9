//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and addresses.
//! Every problem is reported, not just the first one found.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::BalancerConfig;
use crate::load_balancer::backend::Backend;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a socket address")]
    BindAddress(String),

    #[error("listener.max_connections must be greater than zero")]
    MaxConnections,

    #[error("backends[{index}]: {reason}")]
    Backend { index: usize, reason: String },

    #[error("health_check.interval_secs must be greater than zero")]
    HealthInterval,

    #[error("health_check.{0} must be greater than zero")]
    HealthTimeout(&'static str),

    #[error("health_check.path '{0}' must start with a single '/'")]
    HealthPath(String),

    #[error("timeouts.connect_ms must be greater than zero")]
    ConnectTimeout,

    #[error("retries.max_attempts must be at least 1")]
    MaxAttempts,

    #[error("retries.base_delay_ms ({base}) exceeds retries.max_delay_ms ({max})")]
    BackoffRange { base: u64, max: u64 },

    #[error("observability.log_format '{0}' is not one of: pretty, json")]
    LogFormat(String),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    MetricsAddress(String),
}

/// Validate a parsed configuration.
///
/// An empty backend list is accepted: the balancer runs degraded and answers
/// every client with a 503.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }

    for (index, backend) in config.backends.iter().enumerate() {
        if backend.host.trim().is_empty() {
            errors.push(ValidationError::Backend {
                index,
                reason: "host is empty".to_string(),
            });
            continue;
        }
        if backend.host.contains("://") {
            errors.push(ValidationError::Backend {
                index,
                reason: format!("host '{}' must not include a scheme", backend.host),
            });
            continue;
        }
        if backend.port == 0 {
            errors.push(ValidationError::Backend {
                index,
                reason: "port must be non-zero".to_string(),
            });
            continue;
        }
        if let Err(e) = Backend::new(&backend.host, backend.port) {
            errors.push(ValidationError::Backend {
                index,
                reason: e.to_string(),
            });
        }
    }

    let health = &config.health_check;
    if health.interval_secs == 0 {
        errors.push(ValidationError::HealthInterval);
    }
    if health.connect_timeout_ms == 0 {
        errors.push(ValidationError::HealthTimeout("connect_timeout_ms"));
    }
    if health.read_timeout_ms == 0 {
        errors.push(ValidationError::HealthTimeout("read_timeout_ms"));
    }
    // "//host/x" would be resolved as a scheme-relative URL to another host.
    if !health.path.starts_with('/') || health.path.starts_with("//") {
        errors.push(ValidationError::HealthPath(health.path.clone()));
    }

    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::ConnectTimeout);
    }

    let retries = &config.retries;
    if retries.max_attempts == 0 {
        errors.push(ValidationError::MaxAttempts);
    }
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::BackoffRange {
            base: retries.base_delay_ms,
            max: retries.max_delay_ms,
        });
    }

    let observability = &config.observability;
    if !matches!(observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::LogFormat(observability.log_format.clone()));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
