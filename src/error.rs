/*!
 * Client Error Types
 *
 * Every failure the client can hit is logged where it happens and then
 * surfaced to the caller as one of these variants. Nothing is retried.
 */

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Result alias used throughout the client API
pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Errors produced by [`TcpClient`](crate::TcpClient) and [`Connection`](crate::Connection)
#[derive(Debug, Error)]
pub enum ClientError {
    /// The OS refused to create a socket (descriptor exhaustion, permission)
    #[error("could not create socket: {0}")]
    Socket(#[source] io::Error),

    /// Hostname lookup failed
    #[error("failed to resolve hostname {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Hostname lookup succeeded but produced no IPv4 address
    #[error("hostname {host} has no IPv4 address")]
    NoAddress { host: String },

    /// Transport-level connect failed (refused, unreachable, timed out)
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Send failed
    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    /// Receive failed
    #[error("recv failed: {0}")]
    Recv(#[source] io::Error),
}

impl ClientError {
    /// The underlying OS error, if this failure carries one
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            ClientError::Socket(e) | ClientError::Send(e) | ClientError::Recv(e) => Some(e),
            ClientError::Resolve { source, .. } | ClientError::Connect { source, .. } => Some(source),
            ClientError::NoAddress { .. } => None,
        }
    }
}
