//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tcp_balancer::config::{BackendConfig, BalancerConfig, HealthCheckConfig};
use tcp_balancer::lifecycle::Shutdown;
use tcp_balancer::net::{ConnectionTracker, Listener};
use tcp_balancer::observability::ChannelSink;
use tcp_balancer::ProxyServer;

/// Start a backend that answers every connection with its tag and closes.
pub async fn start_tagged_backend(tag: &'static str) -> SocketAddr {
    start_delayed_backend(tag, Duration::ZERO).await
}

/// Like [`start_tagged_backend`], but waits `delay` before answering.
pub async fn start_delayed_backend(tag: &'static str, delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                tokio::time::sleep(delay).await;
                let _ = socket.write_all(tag.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Start an HTTP backend whose status code can be switched while it runs.
pub async fn start_status_backend(status: Arc<AtomicU16>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let status = status.load(Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok"
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn backend_config(addr: SocketAddr) -> BackendConfig {
    BackendConfig::new(addr.ip().to_string(), addr.port())
}

/// Config with health checks off, so tests control health state directly.
pub fn config_for(backends: Vec<BackendConfig>) -> BalancerConfig {
    BalancerConfig {
        backends,
        health_check: HealthCheckConfig {
            enabled: false,
            ..HealthCheckConfig::default()
        },
        ..BalancerConfig::default()
    }
}

/// A balancer running on an ephemeral port.
pub struct RunningBalancer {
    pub addr: SocketAddr,
    pub pool: Arc<tcp_balancer::load_balancer::BackendPool>,
    pub events: tokio::sync::mpsc::UnboundedReceiver<tcp_balancer::observability::BalancerEvent>,
    pub tracker: ConnectionTracker,
    pub shutdown: Shutdown,
    pub handle: tokio::task::JoinHandle<()>,
}

pub async fn start_balancer(config: BalancerConfig) -> RunningBalancer {
    let (sink, events) = ChannelSink::new();
    let server = ProxyServer::new(config, Arc::new(sink)).unwrap();
    let pool = server.pool();
    let tracker = server.tracker();

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, server.config().listener.max_connections);

    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    RunningBalancer {
        addr,
        pool,
        events,
        tracker,
        shutdown,
        handle,
    }
}

/// Send `request` through the balancer and read until it closes.
pub async fn send(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .expect("balancer response timed out")
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}
