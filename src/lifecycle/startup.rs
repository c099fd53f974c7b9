//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter when enabled
//! - Bind the listener before anything serves traffic
//! - Wire OS signals to the shutdown coordinator
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Configuration arrives already validated

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::config::BalancerConfig;
use crate::lifecycle::{signals, Shutdown};
use crate::load_balancer::BackendError;
use crate::net::{Listener, ListenerError};
use crate::observability::{metrics, TracingSink};
use crate::proxy::ProxyServer;

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Bind(#[from] ListenerError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Run the balancer until a termination signal arrives.
pub async fn run(config: BalancerConfig) -> Result<(), StartupError> {
    if config.backends.is_empty() {
        tracing::warn!("No backends configured, every client will receive a 503");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;
    let server = ProxyServer::new(config, Arc::new(TracingSink))?;

    for backend in server.pool().iter() {
        tracing::info!(backend = %backend, "Registered backend");
    }

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        signals::wait_for_signal().await;
        shutdown.trigger();
    });

    server.run(listener, receiver).await;
    Ok(())
}
