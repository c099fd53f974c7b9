//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Prober, dispatcher and forwarder produce:
//!     → events.rs (structured BalancerEvent values through an EventSink)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → logging.rs (tracing subscriber: stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Any external EventSink
//! ```
//!
//! # Design Decisions
//! - The core emits events; it does not assume where they end up
//! - Metrics are cheap and no-ops without an installed recorder

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{BalancerEvent, ChannelSink, EventSink, TracingSink};
