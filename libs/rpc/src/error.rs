use tether_core::PeerId;
use thiserror::Error;

/// Operational failures of a call, reported through the call's error
///
/// Misuse of the client (mismatched fan-out lengths, a full completion
/// channel, remote calls on a client without a host or protocol) panics
/// instead and never shows up here.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("cannot make local calls: server not set")]
    NoServer,

    #[error("connection to {peer} failed: {source}")]
    Connection {
        peer: PeerId,
        source: tether_fabric::Error,
    },

    #[error("encoding failed: {0}")]
    Encode(#[source] tether_fabric::Error),

    #[error("decoding failed: {0}")]
    Decode(#[source] tether_fabric::Error),

    /// Error string reported by the remote server
    #[error("{0}")]
    Remote(String),

    #[error("call cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The call task ended without delivering its completion
    #[error("call aborted before completion")]
    Aborted,

    /// Error raised by a service implementation
    #[error("{0}")]
    Service(String),
}

impl RpcError {
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
