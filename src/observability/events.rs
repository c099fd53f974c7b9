//! Structured balancer events.
//!
//! The core reports what happens through [`EventSink`] and never formats log
//! lines itself. [`TracingSink`] is the production sink; [`ChannelSink`]
//! hands events to an external consumer.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Something observable happened in the balancer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BalancerEvent {
    /// A probe succeeded for a backend previously marked unhealthy.
    ServerUp { backend: String, at: DateTime<Utc> },
    /// A probe failed for a backend previously marked healthy.
    ServerDown { backend: String, at: DateTime<Utc> },
    /// A probe got an HTTP status back.
    ProbeResponse {
        backend: String,
        status: u16,
        at: DateTime<Utc>,
    },
    /// A probe failed at the transport level (refused, timeout, bad response).
    ProbeFailed {
        backend: String,
        error: String,
        at: DateTime<Utc>,
    },
    /// A client connection was assigned a backend.
    Routed {
        backend: String,
        peer: SocketAddr,
        at: DateTime<Utc>,
    },
    /// A client connection was turned away because no backend was eligible.
    NoHealthyServer {
        peer: SocketAddr,
        reason: String,
        at: DateTime<Utc>,
    },
    /// A connect attempt to a backend failed.
    ForwardError {
        backend: String,
        peer: SocketAddr,
        attempt: u32,
        error: String,
        at: DateTime<Utc>,
    },
    /// An established relay broke on an I/O error.
    RelayError {
        backend: String,
        peer: SocketAddr,
        error: String,
        at: DateTime<Utc>,
    },
}

impl BalancerEvent {
    /// Backend identity, when the event concerns one.
    pub fn backend(&self) -> Option<&str> {
        match self {
            BalancerEvent::ServerUp { backend, .. }
            | BalancerEvent::ServerDown { backend, .. }
            | BalancerEvent::ProbeResponse { backend, .. }
            | BalancerEvent::ProbeFailed { backend, .. }
            | BalancerEvent::Routed { backend, .. }
            | BalancerEvent::ForwardError { backend, .. }
            | BalancerEvent::RelayError { backend, .. } => Some(backend),
            BalancerEvent::NoHealthyServer { .. } => None,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            BalancerEvent::ServerUp { at, .. }
            | BalancerEvent::ServerDown { at, .. }
            | BalancerEvent::ProbeResponse { at, .. }
            | BalancerEvent::ProbeFailed { at, .. }
            | BalancerEvent::Routed { at, .. }
            | BalancerEvent::NoHealthyServer { at, .. }
            | BalancerEvent::ForwardError { at, .. }
            | BalancerEvent::RelayError { at, .. } => *at,
        }
    }

    /// True for `ServerUp` and `ServerDown`.
    pub fn is_transition(&self) -> bool {
        matches!(
            self,
            BalancerEvent::ServerUp { .. } | BalancerEvent::ServerDown { .. }
        )
    }
}

/// Destination for balancer events.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: BalancerEvent);
}

/// Writes every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: BalancerEvent) {
        match &event {
            BalancerEvent::ServerUp { backend, at } => {
                tracing::info!(backend = %backend, at = %at, "Server is back online");
            }
            BalancerEvent::ServerDown { backend, at } => {
                tracing::warn!(backend = %backend, at = %at, "Server has gone offline");
            }
            BalancerEvent::ProbeResponse { backend, status, .. } => {
                tracing::info!(backend = %backend, status, "Health check response");
            }
            BalancerEvent::ProbeFailed { backend, error, .. } => {
                tracing::warn!(backend = %backend, error = %error, "Health check failed");
            }
            BalancerEvent::Routed { backend, peer, .. } => {
                tracing::info!(backend = %backend, peer = %peer, "Routing connection");
            }
            BalancerEvent::NoHealthyServer { peer, reason, at } => {
                tracing::error!(peer = %peer, reason = %reason, at = %at, "No healthy servers available");
            }
            BalancerEvent::ForwardError {
                backend,
                peer,
                attempt,
                error,
                ..
            } => {
                tracing::warn!(backend = %backend, peer = %peer, attempt, error = %error, "Error connecting to backend");
            }
            BalancerEvent::RelayError {
                backend,
                peer,
                error,
                ..
            } => {
                tracing::warn!(backend = %backend, peer = %peer, error = %error, "Relay aborted");
            }
        }
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<BalancerEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BalancerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: BalancerEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let event = BalancerEvent::ProbeResponse {
            backend: "localhost:8081".into(),
            status: 200,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "probe_response");
        assert_eq!(json["backend"], "localhost:8081");
        assert_eq!(json["status"], 200);
        assert!(json["at"].is_string());
    }

    #[test]
    fn accessors() {
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let down = BalancerEvent::ServerDown {
            backend: "b".into(),
            at: Utc::now(),
        };
        let rejected = BalancerEvent::NoHealthyServer {
            peer,
            reason: "no healthy backends available".into(),
            at: Utc::now(),
        };
        assert!(down.is_transition());
        assert_eq!(down.backend(), Some("b"));
        assert!(!rejected.is_transition());
        assert_eq!(rejected.backend(), None);
        assert!(rejected.at() >= down.at());
    }

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(BalancerEvent::ServerDown {
            backend: "a".into(),
            at: Utc::now(),
        });
        sink.emit(BalancerEvent::ServerUp {
            backend: "a".into(),
            at: Utc::now(),
        });

        assert!(matches!(rx.recv().await, Some(BalancerEvent::ServerDown { .. })));
        assert!(matches!(rx.recv().await, Some(BalancerEvent::ServerUp { .. })));
    }

    #[test]
    fn channel_sink_tolerates_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(BalancerEvent::ServerUp {
            backend: "a".into(),
            at: Utc::now(),
        });
    }
}
