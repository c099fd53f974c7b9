//! Backend pool management.
//!
//! # Responsibilities
//! - Hold the fixed, ordered list of backends built at startup
//! - Expose per-backend health reads and writes
//!
//! The list itself never changes after construction, so it is shared without
//! locking. Each backend's flag is updated independently of the others.

use std::sync::Arc;

use crate::config::BackendConfig;
use crate::load_balancer::backend::{Backend, BackendError};

/// Fixed-size, ordered registry of backends indexed `0..N`.
#[derive(Debug, Default)]
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
}

impl BackendPool {
    /// Create a pool from already-built backends, keeping their order.
    pub fn new(backends: Vec<Backend>) -> Self {
        Self {
            backends: backends.into_iter().map(Arc::new).collect(),
        }
    }

    /// Create a pool from configuration.
    pub fn from_config(configs: &[BackendConfig]) -> Result<Self, BackendError> {
        let backends = configs
            .iter()
            .map(|config| Backend::new(&config.host, config.port))
            .collect::<Result<Vec<_>, _>>()?;

        for backend in &backends {
            tracing::debug!(backend = %backend, base_url = %backend.base_url(), "Backend registered");
        }

        Ok(Self::new(backends))
    }

    /// Get the backend at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.size()`.
    pub fn get(&self, index: usize) -> &Arc<Backend> {
        &self.backends[index]
    }

    /// Number of configured backends.
    pub fn size(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `index >= self.size()`.
    pub fn is_healthy(&self, index: usize) -> bool {
        self.get(index).is_healthy()
    }

    /// Set the health flag of the backend at `index`, returning the previous flag.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.size()`.
    pub fn set_healthy(&self, index: usize, healthy: bool) -> bool {
        self.get(index).set_healthy(healthy)
    }

    /// Count of backends currently marked healthy.
    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_healthy()).count()
    }

    /// Iterate backends in rotation order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.backends.iter()
    }
}
