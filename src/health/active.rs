//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend with an HTTP GET
//! - Update backend health flags from the results
//! - Report online/offline transitions, and only transitions

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures_util::future::join_all;
use http_body_util::Empty;
use hyper::client::conn::http1;
use hyper::{header, Method, Request};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use url::Position;

use crate::config::HealthCheckConfig;
use crate::load_balancer::{Backend, BackendPool};
use crate::observability::{metrics, BalancerEvent, EventSink};
use crate::resilience::connect_with_timeout;

const USER_AGENT: &str = "tcp-balancer-health-check";

/// Result of probing one backend once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The backend answered with this HTTP status.
    Status(u16),
    /// No usable response: refused, timed out, or malformed.
    Failed(String),
}

impl ProbeOutcome {
    /// Only a 200 counts as healthy.
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Status(200))
    }
}

pub struct HealthMonitor {
    pool: Arc<BackendPool>,
    config: HealthCheckConfig,
    events: Arc<dyn EventSink>,
}

impl HealthMonitor {
    pub fn new(pool: Arc<BackendPool>, config: HealthCheckConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            pool,
            config,
            events,
        }
    }

    /// Probe on every tick until `shutdown` fires. The first cycle runs immediately.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            backends = self.pool.size(),
            "Health monitor starting"
        );

        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }

            tokio::select! {
                _ = self.check_all() => {}
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, abandoning cycle");
                    break;
                }
            }
        }
    }

    /// Probe every backend concurrently, then apply the results.
    pub async fn check_all(&self) {
        let outcomes = join_all(self.pool.iter().map(|backend| self.probe(backend))).await;

        for (index, outcome) in outcomes.into_iter().enumerate() {
            self.apply(index, outcome);
        }
    }

    fn apply(&self, index: usize, outcome: ProbeOutcome) {
        let identity = self.pool.get(index).to_string();

        match &outcome {
            ProbeOutcome::Status(status) => self.events.emit(BalancerEvent::ProbeResponse {
                backend: identity.clone(),
                status: *status,
                at: Utc::now(),
            }),
            ProbeOutcome::Failed(error) => self.events.emit(BalancerEvent::ProbeFailed {
                backend: identity.clone(),
                error: error.clone(),
                at: Utc::now(),
            }),
        }

        let healthy = outcome.is_healthy();
        let previous = self.pool.set_healthy(index, healthy);
        metrics::record_probe(&identity, healthy);
        metrics::record_backend_health(&identity, healthy);

        if previous != healthy {
            let at = Utc::now();
            let event = if healthy {
                BalancerEvent::ServerUp { backend: identity, at }
            } else {
                BalancerEvent::ServerDown { backend: identity, at }
            };
            self.events.emit(event);
        }
    }

    /// Send one health check request to `backend`.
    ///
    /// Every probe opens a fresh connection. Connecting and waiting for the
    /// response are bounded separately.
    pub async fn probe(&self, backend: &Backend) -> ProbeOutcome {
        let url = match backend.base_url().join(&self.config.path) {
            Ok(url) => url,
            Err(e) => return ProbeOutcome::Failed(format!("invalid health check url: {e}")),
        };
        if url.origin() != backend.base_url().origin() {
            return ProbeOutcome::Failed(format!("health check url {url} leaves backend {backend}"));
        }

        let request = match Request::builder()
            .method(Method::GET)
            .uri(&url[Position::BeforePath..])
            .header(header::HOST, backend.to_string())
            .header(header::USER_AGENT, USER_AGENT)
            .body(Empty::<Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => return ProbeOutcome::Failed(format!("failed to build request: {e}")),
        };

        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = match connect_with_timeout(backend.host(), backend.port(), connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => return ProbeOutcome::Failed(format!("connect failed: {e}")),
        };

        let read_timeout = Duration::from_millis(self.config.read_timeout_ms);
        match time::timeout(read_timeout, exchange(stream, request)).await {
            Ok(Ok(status)) => ProbeOutcome::Status(status),
            Ok(Err(e)) => ProbeOutcome::Failed(error_chain(&e)),
            Err(_) => ProbeOutcome::Failed(format!("no response within {read_timeout:?}")),
        }
    }
}

/// Run one HTTP/1.1 request over `stream` and return the response status.
async fn exchange(stream: TcpStream, request: Request<Empty<Bytes>>) -> Result<u16, hyper::Error> {
    let (mut sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
    let response = sender.send_request(request);
    tokio::pin!(connection, response);

    // The connection is driven here rather than spawned, so a timed-out
    // probe drops the socket with it.
    tokio::select! {
        result = &mut response => Ok(result?.status().as_u16()),
        closed = &mut connection => {
            closed?;
            Ok(response.await?.status().as_u16())
        }
    }
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
