//! TCP load balancer library.
//!
//! Accepts client connections, picks a healthy backend in round-robin order
//! and relays bytes both ways. A background prober keeps per-backend health
//! current with periodic HTTP GET checks.

// Core subsystems
pub mod config;
pub mod net;
pub mod proxy;

// Traffic management
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::BalancerConfig;
pub use lifecycle::Shutdown;
pub use proxy::ProxyServer;
