use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use tether_core::{PeerId, ProtocolId};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::host::Host;
use crate::stream::{BoxStream, Stream};

/// Buffer size of each in-memory pipe direction
const PIPE_CAPACITY: usize = 64 * 1024;

/// A stream delivered to a memory host: protocol, dialing peer, stream
pub type Inbound = (ProtocolId, PeerId, BoxStream);

/// In-process network connecting [`MemoryHost`]s through duplex pipes
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    peers: Arc<RwLock<HashMap<PeerId, mpsc::UnboundedSender<Inbound>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the network as `id`, returning the host and its inbound streams
    pub fn host(&self, id: impl Into<PeerId>) -> (MemoryHost, mpsc::UnboundedReceiver<Inbound>) {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), tx);

        let host = MemoryHost {
            id,
            network: self.clone(),
        };
        (host, rx)
    }

    /// Make `id` unreachable for future streams
    pub fn disconnect(&self, id: &PeerId) {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    fn inbox(&self, id: &PeerId) -> Option<mpsc::UnboundedSender<Inbound>> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

/// A host on a [`MemoryNetwork`]
pub struct MemoryHost {
    id: PeerId,
    network: MemoryNetwork,
}

#[async_trait::async_trait]
impl Host for MemoryHost {
    fn id(&self) -> PeerId {
        self.id.clone()
    }

    async fn open_stream(&self, peer: &PeerId, protocol: &ProtocolId) -> Result<BoxStream> {
        let inbox = self
            .network
            .inbox(peer)
            .ok_or_else(|| Error::ConnectionRefused(format!("unknown peer {}", peer)))?;

        let (local, remote) = MemoryStream::pair(PIPE_CAPACITY);
        inbox
            .send((protocol.clone(), self.id.clone(), Box::new(remote) as BoxStream))
            .map_err(|_| Error::ConnectionRefused(format!("{} is not accepting streams", peer)))?;

        Ok(Box::new(local))
    }
}

/// One end of an in-memory pipe
///
/// Unlike a bare [`DuplexStream`], a reset is visible to the other end:
/// once its data is drained it reads `ConnectionReset` instead of a clean
/// end-of-stream.
#[derive(Debug)]
pub struct MemoryStream {
    inner: DuplexStream,
    reset_here: Arc<AtomicBool>,
    reset_there: Arc<AtomicBool>,
}

impl MemoryStream {
    /// Create both ends of a pipe buffering `capacity` bytes per direction
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(capacity);
        let a_reset = Arc::new(AtomicBool::new(false));
        let b_reset = Arc::new(AtomicBool::new(false));
        (
            Self {
                inner: a,
                reset_here: a_reset.clone(),
                reset_there: b_reset.clone(),
            },
            Self {
                inner: b,
                reset_here: b_reset,
                reset_there: a_reset,
            },
        )
    }

    fn reset_error() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionReset, "memory stream reset by peer")
    }
}

impl Stream for MemoryStream {
    fn reset(&mut self) {
        self.reset_here.store(true, Ordering::Release);
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before => {
                if self.reset_there.load(Ordering::Acquire) {
                    Poll::Ready(Err(Self::reset_error()))
                } else {
                    Poll::Ready(Ok(()))
                }
            }
            other => other,
        }
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.reset_there.load(Ordering::Acquire) {
            return Poll::Ready(Err(Self::reset_error()));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
