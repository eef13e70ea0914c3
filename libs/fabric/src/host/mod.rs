use tether_core::{PeerId, ProtocolId};

use crate::error::Result;
use crate::stream::BoxStream;

pub mod memory;
pub mod tcp;

pub use self::memory::{Inbound, MemoryHost, MemoryNetwork, MemoryStream};
pub use self::tcp::{TcpHost, TcpHostBuilder, TcpHostListener, TcpIncoming};

/// A network endpoint that can open protocol-tagged streams to peers
///
/// Each call to [`open_stream`](Host::open_stream) yields a fresh stream that
/// is owned by a single exchange. Cancellation is the caller's concern: drop
/// the returned future to abandon stream establishment.
#[async_trait::async_trait]
pub trait Host: Send + Sync {
    /// Identity of this endpoint
    fn id(&self) -> PeerId;

    /// Open a new stream to `peer` speaking `protocol`
    async fn open_stream(&self, peer: &PeerId, protocol: &ProtocolId) -> Result<BoxStream>;
}
