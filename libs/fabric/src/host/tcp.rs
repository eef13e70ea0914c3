use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tether_core::{PeerId, ProtocolId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};
use crate::host::Host;
use crate::stream::{BoxStream, Stream};

/// Longest protocol or peer id accepted in a handshake
const MAX_HANDSHAKE_FIELD: usize = 1024;

/// How long an accepted connection may take to send its handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP host with a static peer store
///
/// Every opened stream is a fresh TCP connection that starts with a
/// handshake naming the protocol and the dialing peer, each sent as a
/// 4-byte big-endian length prefix followed by UTF-8 bytes.
pub struct TcpHost {
    id: PeerId,
    peers: RwLock<HashMap<PeerId, SocketAddr>>,
    connect_timeout: Option<Duration>,
}

impl TcpHost {
    /// Create a host with no known peers and no connect timeout
    pub fn new(id: impl Into<PeerId>) -> Self {
        Self::builder().id(id).build()
    }

    /// Create a builder for configuring the host
    pub fn builder() -> TcpHostBuilder {
        TcpHostBuilder::new()
    }

    /// Record the address a peer can be dialed at
    pub fn add_peer(&self, peer: impl Into<PeerId>, addr: SocketAddr) {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer.into(), addr);
    }

    pub fn remove_peer(&self, peer: &PeerId) -> Option<SocketAddr> {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer)
    }

    pub fn peer_addr(&self, peer: &PeerId) -> Option<SocketAddr> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .copied()
    }
}

#[async_trait::async_trait]
impl Host for TcpHost {
    fn id(&self) -> PeerId {
        self.id.clone()
    }

    async fn open_stream(&self, peer: &PeerId, protocol: &ProtocolId) -> Result<BoxStream> {
        let addr = self
            .peer_addr(peer)
            .ok_or_else(|| Error::ConnectionRefused(format!("no address known for {}", peer)))?;

        let connect_op = TcpStream::connect(addr);

        let mut stream = if let Some(timeout) = self.connect_timeout {
            tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::Custom("Connect timeout exceeded".to_string()))??
        } else {
            connect_op.await?
        };
        stream.set_nodelay(true)?;

        tracing::debug!("opened tcp stream to {} ({}) for {}", peer, addr, protocol);

        write_field(&mut stream, protocol.as_str()).await?;
        write_field(&mut stream, self.id.as_str()).await?;
        stream.flush().await?;

        Ok(Box::new(stream))
    }
}

/// TCP listener accepting handshaked streams for one protocol
pub struct TcpHostListener {
    listener: TcpListener,
    protocol: ProtocolId,
    handshake_timeout: Duration,
}

impl TcpHostListener {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr, protocol: impl Into<ProtocolId>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            protocol: protocol.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Set how long an accepted connection may take to send its handshake
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Accept the next connection
    ///
    /// No handshake bytes are read here, so a slow or silent dialer never
    /// holds up the accept loop. Call [`TcpIncoming::handshake`], typically
    /// on a task of its own, to obtain the stream.
    pub async fn accept(&self) -> Result<TcpIncoming> {
        let (stream, addr) = self.listener.accept().await?;
        Ok(TcpIncoming {
            stream,
            addr,
            protocol: self.protocol.clone(),
            timeout: self.handshake_timeout,
        })
    }

    /// Get the local address this listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }
}

/// An accepted TCP connection whose handshake has not been read yet
pub struct TcpIncoming {
    stream: TcpStream,
    addr: SocketAddr,
    protocol: ProtocolId,
    timeout: Duration,
}

impl TcpIncoming {
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Read the handshake, returning the stream and the identity of the
    /// peer that opened it
    ///
    /// Streams announcing a different protocol are reset and reported as
    /// [`Error::ProtocolMismatch`]. A dialer that does not finish the
    /// handshake within the listener's timeout is reset as well.
    pub async fn handshake(self) -> Result<(BoxStream, PeerId)> {
        let Self {
            mut stream,
            addr,
            protocol: expected,
            timeout,
        } = self;

        let fields = tokio::time::timeout(timeout, async {
            let protocol = read_field(&mut stream).await?;
            let peer = read_field(&mut stream).await?;
            Ok::<_, Error>((protocol, peer))
        })
        .await;

        let (protocol, peer) = match fields {
            Ok(Ok(fields)) => fields,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::warn!("handshake from {} timed out", addr);
                stream.reset();
                return Err(Error::Custom("Handshake timeout exceeded".to_string()));
            }
        };

        if protocol != expected.as_str() {
            tracing::warn!("rejecting stream from {} for protocol {}", addr, protocol);
            stream.reset();
            return Err(Error::ProtocolMismatch {
                expected: expected.to_string(),
                actual: protocol,
            });
        }

        Ok((Box::new(stream) as BoxStream, PeerId::from(peer)))
    }
}

/// Builder for configuring a TCP host
#[derive(Default)]
pub struct TcpHostBuilder {
    id: PeerId,
    peers: HashMap<PeerId, SocketAddr>,
    connect_timeout: Option<Duration>,
}

impl TcpHostBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the identity of this host
    pub fn id(mut self, id: impl Into<PeerId>) -> Self {
        self.id = id.into();
        self
    }

    /// Add a known peer address
    pub fn peer(mut self, peer: impl Into<PeerId>, addr: SocketAddr) -> Self {
        self.peers.insert(peer.into(), addr);
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> TcpHost {
        TcpHost {
            id: self.id,
            peers: RwLock::new(self.peers),
            connect_timeout: self.connect_timeout,
        }
    }
}

async fn write_field(stream: &mut TcpStream, field: &str) -> Result<()> {
    stream.write_u32(field.len() as u32).await?;
    stream.write_all(field.as_bytes()).await?;
    Ok(())
}

async fn read_field(stream: &mut TcpStream) -> Result<String> {
    let len = stream.read_u32().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ConnectionClosed
        } else {
            e.into()
        }
    })? as usize;

    if len > MAX_HANDSHAKE_FIELD {
        return Err(Error::InvalidFrame(format!(
            "Handshake field too large: {} bytes",
            len
        )));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|e| Error::InvalidFrame(e.to_string()))
}
