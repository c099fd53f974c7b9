//! Metrics collection and exposition.
//!
//! # Metrics
//! - `balancer_backend_health` (gauge): 1=healthy, 0=unhealthy, per backend
//! - `balancer_probes_total` (counter): probes by backend and result
//! - `balancer_connections_total` (counter): accepted client connections
//! - `balancer_active_connections` (gauge): connections currently relaying
//! - `balancer_rejected_total` (counter): clients answered with a 503, by reason
//! - `balancer_connect_failures_total` (counter): failed backend connect attempts
//! - `balancer_relay_bytes_total` (counter): relayed bytes by backend and direction
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("balancer_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_probe(backend: &str, success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("balancer_probes_total", "backend" => backend.to_string(), "result" => result)
        .increment(1);
}

pub fn record_connection_opened() {
    counter!("balancer_connections_total").increment(1);
    gauge!("balancer_active_connections").increment(1.0);
}

pub fn record_connection_closed() {
    gauge!("balancer_active_connections").decrement(1.0);
}

pub fn record_rejected(reason: &'static str) {
    counter!("balancer_rejected_total", "reason" => reason).increment(1);
}

pub fn record_connect_failure(backend: &str) {
    counter!("balancer_connect_failures_total", "backend" => backend.to_string()).increment(1);
}

pub fn record_relay_bytes(backend: &str, to_backend: u64, to_client: u64) {
    counter!("balancer_relay_bytes_total", "backend" => backend.to_string(), "direction" => "to_backend")
        .increment(to_backend);
    counter!("balancer_relay_bytes_total", "backend" => backend.to_string(), "direction" => "to_client")
        .increment(to_client);
}
