//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server (host, port, derived base URL)
//! - Track health state with an atomic flag readable from any task

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use url::Url;

/// Error building a backend from configuration.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend address {host}:{port}: {source}")]
    InvalidAddress {
        host: String,
        port: u16,
        #[source]
        source: url::ParseError,
    },
}

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    host: String,
    port: u16,
    /// Pre-calculated base URL for health probes.
    base_url: Url,
    /// Eligibility for routing. Starts healthy.
    healthy: AtomicBool,
}

impl Backend {
    /// Create a new backend. IPv6 literals may be given with or without brackets.
    pub fn new(host: &str, port: u16) -> Result<Self, BackendError> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let url_host = if host.contains(':') {
            format!("[{}]", host)
        } else {
            host.to_string()
        };

        let base_url = Url::parse(&format!("http://{}:{}/", url_host, port)).map_err(|source| {
            BackendError::InvalidAddress {
                host: host.to_string(),
                port,
                source,
            }
        })?;

        Ok(Self {
            host: host.to_string(),
            port,
            base_url,
            healthy: AtomicBool::new(true),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL, always ending in `/`.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Return true if the backend may receive traffic.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Store a new health flag, returning the previous one.
    pub fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::AcqRel)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_healthy_with_base_url() {
        let backend = Backend::new("localhost", 8081).unwrap();
        assert!(backend.is_healthy());
        assert_eq!(backend.base_url().as_str(), "http://localhost:8081/");
        assert_eq!(backend.to_string(), "localhost:8081");
    }

    #[test]
    fn set_healthy_returns_previous() {
        let backend = Backend::new("127.0.0.1", 9000).unwrap();
        assert!(backend.set_healthy(false));
        assert!(!backend.is_healthy());
        assert!(!backend.set_healthy(false));
        assert!(!backend.set_healthy(true));
        assert!(backend.is_healthy());
    }

    #[test]
    fn brackets_ipv6_literals() {
        let backend = Backend::new("::1", 8081).unwrap();
        assert_eq!(backend.host(), "::1");
        assert_eq!(backend.base_url().as_str(), "http://[::1]:8081/");
        assert_eq!(backend.to_string(), "[::1]:8081");

        let bracketed = Backend::new("[::1]", 8081).unwrap();
        assert_eq!(bracketed.host(), "::1");
    }

    #[test]
    fn rejects_unparseable_host() {
        assert!(Backend::new("bad host", 80).is_err());
    }
}
