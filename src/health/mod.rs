//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each backend (HTTP GET, 200 = healthy)
//!     → Swap the backend's health flag
//!     → Emit ServerUp / ServerDown on change
//! ```
//!
//! # Design Decisions
//! - Probes are the only writer of health state; forwarding failures are not
//! - A single probe result flips the flag, no hysteresis
//! - Health state is per-backend, not per-pool

pub mod active;

pub use active::{HealthMonitor, ProbeOutcome};
