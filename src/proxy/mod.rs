//! Proxy subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted client connection
//!     → server.rs (spawn per connection, select backend)
//!     → forwarder.rs (connect with retries, bidirectional relay)
//!     → response.rs (503 when no backend can take the client)
//! ```
//!
//! # Design Decisions
//! - Byte-transparent: the relayed stream is never parsed
//! - One task per client; a slow client never blocks the accept loop

pub mod forwarder;
pub mod response;
pub mod server;

pub use forwarder::{relay_streams, ConnectionForwarder, ForwardError, RelayStats};
pub use response::FailureResponse;
pub use server::ProxyServer;
