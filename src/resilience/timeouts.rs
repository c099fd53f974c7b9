//! Timeout enforcement.

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time;

/// Open a TCP connection, failing with `TimedOut` once `timeout` elapses.
pub async fn connect_with_timeout(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    match time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect to {host}:{port} timed out after {timeout:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = connect_with_timeout("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_with_timeout("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_ne!(err.kind(), io::ErrorKind::TimedOut);
    }
}
