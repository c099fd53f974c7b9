//! Listener loop and per-connection dispatch.
//!
//! # Responsibilities
//! - Run the health monitor alongside the accept loop
//! - Hand every accepted connection to its own task immediately
//! - Select a backend, answer with a 503 when none is eligible
//! - On shutdown: stop accepting, stop the prober, drain in-flight relays
//!   within the grace period, then abort whatever is left

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::Instrument;

use crate::config::BalancerConfig;
use crate::health::HealthMonitor;
use crate::lifecycle::Shutdown;
use crate::load_balancer::{BackendError, BackendPool, LoadBalancer, RoundRobin};
use crate::net::{ConnectionId, ConnectionTracker, Listener, ListenerError};
use crate::observability::{metrics, BalancerEvent, EventSink};
use crate::proxy::forwarder::ConnectionForwarder;
use crate::proxy::response::{send_failure, FailureResponse};

const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

/// Wait out a failed accept before retrying. Returns true if shutdown fired meanwhile.
async fn pause_or_shutdown(shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = time::sleep(ACCEPT_ERROR_PAUSE) => false,
        _ = shutdown.recv() => true,
    }
}

/// Everything a connection task needs, cheap to clone.
#[derive(Clone)]
struct Dispatcher {
    pool: Arc<BackendPool>,
    balancer: Arc<dyn LoadBalancer>,
    forwarder: Arc<ConnectionForwarder>,
    events: Arc<dyn EventSink>,
}

impl Dispatcher {
    async fn handle(self, mut stream: TcpStream, peer: SocketAddr, id: ConnectionId) {
        let backend = match self.balancer.next_server(&self.pool) {
            Ok(backend) => backend,
            Err(reason) => {
                self.events.emit(BalancerEvent::NoHealthyServer {
                    peer,
                    reason: reason.to_string(),
                    at: Utc::now(),
                });
                metrics::record_rejected("no_healthy_backend");
                if let Err(e) = send_failure(&mut stream, FailureResponse::NoHealthyServers).await {
                    tracing::debug!(error = %e, "Failed to send error response");
                }
                return;
            }
        };

        self.events.emit(BalancerEvent::Routed {
            backend: backend.to_string(),
            peer,
            at: Utc::now(),
        });

        match self.forwarder.relay(stream, peer, &backend).await {
            Ok(stats) => tracing::debug!(
                connection_id = %id,
                backend = %backend,
                to_backend = stats.to_backend,
                to_client = stats.to_client,
                "Connection finished"
            ),
            Err(e) => tracing::debug!(connection_id = %id, error = %e, "Connection ended with error"),
        }
    }
}

/// TCP load balancer server.
pub struct ProxyServer {
    config: BalancerConfig,
    dispatcher: Dispatcher,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    /// Create a new server with the given configuration.
    pub fn new(config: BalancerConfig, events: Arc<dyn EventSink>) -> Result<Self, BackendError> {
        let pool = Arc::new(BackendPool::from_config(&config.backends)?);
        let forwarder = Arc::new(ConnectionForwarder::new(
            &config.timeouts,
            &config.retries,
            events.clone(),
        ));

        Ok(Self {
            config,
            dispatcher: Dispatcher {
                pool,
                balancer: Arc::new(RoundRobin::new()),
                forwarder,
                events,
            },
            tracker: ConnectionTracker::new(),
        })
    }

    /// The shared backend registry.
    pub fn pool(&self) -> Arc<BackendPool> {
        self.dispatcher.pool.clone()
    }

    /// Live count of connections being served.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    /// Serve until `shutdown` fires (or its sender is dropped).
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) {
        match listener.local_addr() {
            Ok(addr) => tracing::info!(
                address = %addr,
                backends = self.dispatcher.pool.size(),
                "Load balancer accepting connections"
            ),
            Err(e) => tracing::warn!(error = %e, "Listener address unavailable"),
        }

        let prober_shutdown = Shutdown::new();
        let monitor = HealthMonitor::new(
            self.dispatcher.pool.clone(),
            self.config.health_check.clone(),
            self.dispatcher.events.clone(),
        );
        let mut prober = tokio::spawn(monitor.run(prober_shutdown.subscribe()));

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        let id = guard.id();
                        let dispatcher = self.dispatcher.clone();
                        let span = tracing::info_span!("connection", id = %id, peer = %peer);
                        connections.spawn(
                            async move {
                                let _permit = permit;
                                let _guard = guard;
                                dispatcher.handle(stream, peer, id).await;
                            }
                            .instrument(span),
                        );
                    }
                    Err(ListenerError::Closed) => {
                        tracing::error!("Connection limiter closed, stopping accept loop");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        if pause_or_shutdown(&mut shutdown).await {
                            tracing::info!("Shutdown signal received, no longer accepting connections");
                            break;
                        }
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "Connection task panicked");
                        }
                    }
                }
            }
        }
        drop(listener);

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        let deadline = Instant::now() + grace;

        prober_shutdown.trigger();
        if time::timeout_at(deadline, &mut prober).await.is_err() {
            tracing::warn!("Health monitor did not stop within grace period, aborting");
            prober.abort();
        }

        if !connections.is_empty() {
            tracing::info!(
                in_flight = self.tracker.active_count(),
                grace_secs = grace.as_secs(),
                "Waiting for in-flight connections"
            );
        }
        let drained = time::timeout_at(deadline, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "Grace period expired, closing remaining connections"
            );
            connections.shutdown().await;
        }

        tracing::info!("Load balancer stopped");
    }
}
