//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Client connection accepted
//!     → pool.rs (fixed backend list + health flags)
//!     → round_robin.rs (rotate through backends, skip unhealthy)
//!     → Return backend or SelectError
//! ```
//!
//! # Design Decisions
//! - Health flags are per-backend atomics written only by the prober
//! - The rotation cursor is a single atomic; selection never takes a lock
//! - Unhealthy backends excluded from selection

use std::sync::Arc;

use thiserror::Error;

pub mod backend;
pub mod pool;
pub mod round_robin;

pub use backend::{Backend, BackendError};
pub use pool::BackendPool;
pub use round_robin::RoundRobin;

/// Why no backend could be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("no backends configured")]
    NoBackendsConfigured,
    #[error("no healthy backends available")]
    NoHealthyBackend,
}

/// A backend selection strategy.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick the next backend to route a connection to.
    fn next_server(&self, pool: &BackendPool) -> Result<Arc<Backend>, SelectError>;
}
