//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{backend::Backend, pool::BackendPool, LoadBalancer, SelectError};

/// Round-robin selector.
///
/// The cursor stays in `[0, N)` and advances by one for every slot examined,
/// healthy or not, so a call that finds nothing still consumes a full rotation.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cursor position.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Claim the next slot, advancing the cursor modulo `len`.
    fn advance(&self, len: usize) -> usize {
        let previous = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
            .unwrap_or_else(|c| c);
        previous % len
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, pool: &BackendPool) -> Result<Arc<Backend>, SelectError> {
        let len = pool.size();
        if len == 0 {
            return Err(SelectError::NoBackendsConfigured);
        }

        for _ in 0..len {
            let index = self.advance(len);
            let backend = pool.get(index);
            if backend.is_healthy() {
                return Ok(backend.clone());
            }
        }
        Err(SelectError::NoHealthyBackend)
    }
}
