//! Error types returned by the [`crate::client::Dispatcher`]

use std::io;

use thiserror::Error;

/// A local failure that aborted a dispatch, including every remaining redirect hop.
///
/// HTTP statuses returned by the server are never errors. These variants only describe
/// failures to reach the server, to transmit the request, or to understand the reply.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The request could not be dispatched as given, e.g. a URI without a host.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The transport could not open a connection to the target.
    #[error("connection refused: {0}")]
    ConnectionRefused(#[source] io::Error),

    /// The request line and headers could not be written.
    #[error("failed to send request head: {0}")]
    SendHeaderFailed(#[source] io::Error),

    /// Fewer body bytes than the declared `Content-Length` reached the transport.
    #[error("failed to send payload: sent {sent} of {expected} bytes")]
    SendPayloadFailed { sent: u64, expected: u64 },

    /// The connection was closed or failed before a complete response head was read.
    #[error("connection lost while reading response head: {0}")]
    ConnectionLost(#[source] io::Error),

    /// The transport timed out while reading the response head.
    #[error("timed out reading response head: {0}")]
    ReadTimeout(#[source] io::Error),

    /// The peer replied with something that is not an HTTP/1.x response head.
    #[error("malformed response head: {0}")]
    MalformedResponse(String),

    /// The configured wall-clock deadline elapsed before the next hop could start.
    #[error("deadline exceeded after {hops} redirect hop(s)")]
    DeadlineExceeded { hops: u16 },
}

impl DispatchError {
    /// Numeric result code, compatible with the negative error codes of embedded HTTP clients.
    pub fn code(&self) -> i32 {
        match self {
            Self::ConnectionRefused(_) => -1,
            Self::SendHeaderFailed(_) => -2,
            Self::SendPayloadFailed { .. } => -3,
            Self::ConnectionLost(_) => -5,
            Self::MalformedResponse(_) => -7,
            Self::ReadTimeout(_) => -11,
            Self::DeadlineExceeded { .. } => -12,
            Self::InvalidRequest(_) => -13,
        }
    }

    /// Classify an I/O error raised while reading a response head.
    pub(crate) fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::ReadTimeout(err),
            io::ErrorKind::InvalidData => Self::MalformedResponse(err.to_string()),
            _ => Self::ConnectionLost(err),
        }
    }
}
