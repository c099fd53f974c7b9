//! Synthetic responses written to clients the balancer cannot serve.
//!
//! The balancer never parses the relayed stream; these raw bytes are the only
//! HTTP it ever produces.

use tokio::io::{AsyncWrite, AsyncWriteExt};

const STATUS_LINE: &str = "HTTP/1.1 503 Service Unavailable\r\n\r\n";

/// Why a client is being turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureResponse {
    /// Selection found no eligible backend.
    NoHealthyServers,
    /// Every connect attempt to the selected backend failed.
    BackendUnreachable,
}

impl FailureResponse {
    pub fn message(&self) -> &'static str {
        match self {
            FailureResponse::NoHealthyServers => {
                "No healthy servers available to handle the request."
            }
            FailureResponse::BackendUnreachable => {
                "The load balancer could not connect to the backend server."
            }
        }
    }

    /// Full response as written on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}{}", STATUS_LINE, self.message()).into_bytes()
    }
}

/// Write `response` to the client and shut down the write side.
pub async fn send_failure<W>(stream: &mut W, response: FailureResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(&response.to_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}
