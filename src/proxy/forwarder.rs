//! Per-connection forwarding to a selected backend.
//!
//! # Responsibilities
//! - Connect to the backend with a deadline and a bounded number of attempts
//! - Answer the client with a 503 when every attempt fails
//! - Relay bytes in both directions until the backend's stream ends or an
//!   I/O error occurs on either side
//!
//! Health state is never touched here. A failed connect is reported as an
//! event and left for the next probe to judge.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::{RetryConfig, TimeoutConfig};
use crate::load_balancer::Backend;
use crate::observability::{metrics, BalancerEvent, EventSink};
use crate::proxy::response::{send_failure, FailureResponse};
use crate::resilience::{connect_with_timeout, retry, RetryPolicy};

const RELAY_BUFFER_SIZE: usize = 8 * 1024;

/// Error type for a forwarded connection.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The connect budget was exhausted; the client got a 503.
    #[error("could not connect to backend {backend} after {attempts} attempts: {source}")]
    BackendUnreachable {
        backend: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    /// The relay broke after the connection was established.
    #[error("relay with backend {backend} failed: {source}")]
    Relay {
        backend: String,
        stats: RelayStats,
        #[source]
        source: io::Error,
    },
}

/// Bytes moved by one relay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub to_backend: u64,
    pub to_client: u64,
}

/// Opens the backend connection for a client and relays between the two.
pub struct ConnectionForwarder {
    connect_timeout: Duration,
    retry_policy: RetryPolicy,
    events: Arc<dyn EventSink>,
}

impl ConnectionForwarder {
    pub fn new(timeouts: &TimeoutConfig, retries: &RetryConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            connect_timeout: Duration::from_millis(timeouts.connect_ms),
            retry_policy: RetryPolicy::from(retries),
            events,
        }
    }

    /// Connect to `backend`, retrying per policy. Each failed attempt is reported.
    pub async fn connect(&self, backend: &Backend, peer: SocketAddr) -> Result<TcpStream, ForwardError> {
        let result = retry(self.retry_policy, |attempt| async move {
            tracing::debug!(backend = %backend, attempt, "Connecting to backend");
            connect_with_timeout(backend.host(), backend.port(), self.connect_timeout)
                .await
                .map_err(|e| {
                    let identity = backend.to_string();
                    metrics::record_connect_failure(&identity);
                    self.events.emit(BalancerEvent::ForwardError {
                        backend: identity,
                        peer,
                        attempt,
                        error: e.to_string(),
                        at: Utc::now(),
                    });
                    e
                })
        })
        .await;

        result.map_err(|e| ForwardError::BackendUnreachable {
            backend: backend.to_string(),
            attempts: e.attempts,
            source: e.last_error,
        })
    }

    /// Serve one client connection through `backend`.
    ///
    /// Both sockets are closed when this returns.
    pub async fn relay(
        &self,
        mut client: TcpStream,
        peer: SocketAddr,
        backend: &Backend,
    ) -> Result<RelayStats, ForwardError> {
        let mut upstream = match self.connect(backend, peer).await {
            Ok(stream) => stream,
            Err(e) => {
                metrics::record_rejected("backend_unreachable");
                if let Err(write_err) = send_failure(&mut client, FailureResponse::BackendUnreachable).await {
                    tracing::debug!(peer = %peer, error = %write_err, "Failed to send error response");
                }
                return Err(e);
            }
        };
        let _ = upstream.set_nodelay(true);

        let (stats, result) = relay_streams(&mut client, &mut upstream).await;
        let identity = backend.to_string();
        metrics::record_relay_bytes(&identity, stats.to_backend, stats.to_client);

        match result {
            Ok(()) => Ok(stats),
            Err(source) => {
                self.events.emit(BalancerEvent::RelayError {
                    backend: identity.clone(),
                    peer,
                    error: source.to_string(),
                    at: Utc::now(),
                });
                Err(ForwardError::Relay {
                    backend: identity,
                    stats,
                    source,
                })
            }
        }
    }
}

/// Pump bytes between `client` and `upstream` until the relay is over.
///
/// The relay ends when the backend's stream ends or either side errors. A
/// client that finishes sending first has its end-of-stream passed on to the
/// backend as a write shutdown, and the response is still relayed back.
pub async fn relay_streams(client: &mut TcpStream, upstream: &mut TcpStream) -> (RelayStats, io::Result<()>) {
    let mut stats = RelayStats::default();

    let result = {
        let (mut client_read, mut client_write) = client.split();
        let (mut upstream_read, mut upstream_write) = upstream.split();

        let upstream_pipe = pump(&mut client_read, &mut upstream_write, &mut stats.to_backend);
        let downstream_pipe = pump(&mut upstream_read, &mut client_write, &mut stats.to_client);
        tokio::pin!(upstream_pipe, downstream_pipe);

        tokio::select! {
            res = &mut downstream_pipe => res,
            res = &mut upstream_pipe => match res {
                Ok(()) => downstream_pipe.await,
                Err(e) => Err(e),
            },
        }
    };

    (stats, result)
}

/// Copy until end-of-stream, then shut down the writer.
async fn pump<R, W>(reader: &mut R, writer: &mut W, transferred: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        *transferred += n as u64;
    }
    // The peer may already have closed; that still ends this direction cleanly.
    let _ = writer.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::ChannelSink;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn forwarder(sink: Arc<dyn EventSink>) -> ConnectionForwarder {
        let timeouts = TimeoutConfig {
            connect_ms: 500,
            ..TimeoutConfig::default()
        };
        ConnectionForwarder::new(&timeouts, &RetryConfig::default(), sink)
    }

    /// Accepts one client on an ephemeral port and hands back both ends.
    async fn client_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();
        (client, server_side, peer)
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<BalancerEvent>) -> Vec<BalancerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn relays_request_and_response() {
        let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_port = backend_listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = backend_listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"echo:").await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        let (sink, mut rx) = ChannelSink::new();
        let forwarder = forwarder(Arc::new(sink));
        let backend = Backend::new("127.0.0.1", backend_port).unwrap();
        let (mut client, server_side, peer) = client_pair().await;

        let relay = tokio::spawn(async move { forwarder.relay(server_side, peer, &backend).await });

        client.write_all(b"ping").await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"echo:ping");

        let stats = relay.await.unwrap().unwrap();
        assert_eq!(stats, RelayStats { to_backend: 4, to_client: 9 });
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn client_half_close_still_gets_response() {
        let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_port = backend_listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = backend_listener.accept().await.unwrap();
            let mut request = Vec::new();
            // Only returns once the balancer forwarded the client's FIN.
            socket.read_to_end(&mut request).await.unwrap();
            socket.write_all(&request).await.unwrap();
            socket.write_all(b" done").await.unwrap();
        });

        let (sink, _rx) = ChannelSink::new();
        let forwarder = forwarder(Arc::new(sink));
        let backend = Backend::new("127.0.0.1", backend_port).unwrap();
        let (mut client, server_side, peer) = client_pair().await;

        let relay = tokio::spawn(async move { forwarder.relay(server_side, peer, &backend).await });

        client.write_all(b"request").await.unwrap();
        client.shutdown().await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"request done");
        assert!(relay.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn backend_reset_mid_relay_closes_without_503() {
        let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_port = backend_listener.local_addr().unwrap().port();
        let (reset_tx, reset_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (mut socket, _) = backend_listener.accept().await.unwrap();
            socket.write_all(b"partial").await.unwrap();
            let _ = reset_rx.await;
            // Zero linger turns the close into a reset.
            #[allow(deprecated)]
            socket.set_linger(Some(Duration::ZERO)).unwrap();
            drop(socket);
        });

        let (sink, mut rx) = ChannelSink::new();
        let forwarder = forwarder(Arc::new(sink));
        let backend = Backend::new("127.0.0.1", backend_port).unwrap();
        let (mut client, server_side, peer) = client_pair().await;

        let relay = tokio::spawn(async move { forwarder.relay(server_side, peer, &backend).await });

        let mut head = [0u8; 7];
        client.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"partial");
        reset_tx.send(()).unwrap();

        let err = relay.await.unwrap().unwrap_err();
        match err {
            ForwardError::Relay { stats, .. } => assert_eq!(stats.to_client, 7),
            other => panic!("expected relay error, got {other:?}"),
        }

        // Torn down as-is: nothing synthesized after the partial response.
        let mut rest = Vec::new();
        let _ = client.read_to_end(&mut rest).await;
        assert!(rest.is_empty(), "unexpected bytes after reset: {rest:?}");
        assert!(!String::from_utf8_lossy(&rest).contains("503"));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], BalancerEvent::RelayError { .. }));
    }

    #[tokio::test]
    async fn unreachable_backend_gets_503_after_three_attempts() {
        let (sink, mut rx) = ChannelSink::new();
        let forwarder = forwarder(Arc::new(sink));
        let backend = Backend::new("127.0.0.1", closed_port().await).unwrap();
        let (mut client, server_side, peer) = client_pair().await;

        let err = forwarder.relay(server_side, peer, &backend).await.unwrap_err();
        assert!(matches!(err, ForwardError::BackendUnreachable { attempts: 3, .. }));

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(
            response,
            b"HTTP/1.1 503 Service Unavailable\r\n\r\nThe load balancer could not connect to the backend server."
        );

        // Health belongs to the prober alone.
        assert!(backend.is_healthy());

        let attempts: Vec<u32> = drain(&mut rx)
            .into_iter()
            .map(|event| match event {
                BalancerEvent::ForwardError { attempt, .. } => attempt,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn connect_succeeds_on_retry() {
        let (sink, mut rx) = ChannelSink::new();
        let forwarder = ConnectionForwarder::new(
            &TimeoutConfig::default(),
            &RetryConfig {
                max_attempts: 3,
                base_delay_ms: 200,
                max_delay_ms: 200,
            },
            Arc::new(sink),
        );
        let port = closed_port().await;
        let backend = Backend::new("127.0.0.1", port).unwrap();
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();

        // The backend comes up while the forwarder is backing off.
        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            let _ = listener.accept().await;
        });

        let stream = forwarder.connect(&backend, peer).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
        assert_eq!(drain(&mut rx).len(), 1);
        late.await.unwrap();
    }
}
