//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connect to backend:
//!     → timeouts.rs (enforce connect deadline)
//!     → On failure: retries.rs (next attempt, up to the budget)
//!     → backoff.rs (delay between attempts, zero by default)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend connect has a deadline
//! - Connect failures never feed back into health state

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use retries::{retry, RetryError, RetryPolicy};
pub use timeouts::connect_with_timeout;
