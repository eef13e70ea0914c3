use std::time::Duration;

use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A bidirectional byte stream opened for exactly one exchange
///
/// Graceful close goes through `AsyncWriteExt::shutdown`. [`Stream::reset`]
/// is the abortive counterpart: after it the stream is only fit to be dropped,
/// and the peer must observe the exchange as failed rather than finished.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {
    /// Abort the stream, signalling failure to the peer
    fn reset(&mut self);
}

pub type BoxStream = Box<dyn Stream>;

impl Stream for TcpStream {
    fn reset(&mut self) {
        // Zero linger turns the close on drop into an RST.
        if let Err(e) = SockRef::from(&*self).set_linger(Some(Duration::ZERO)) {
            tracing::warn!("failed to reset tcp stream: {}", e);
        }
    }
}
