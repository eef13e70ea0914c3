//! Tether Fabric - stream transport and codec layer
//!
//! Provides the [`Host`] abstraction that opens protocol-tagged streams to
//! peers (TCP and in-memory implementations), the [`Codec`] trait with a
//! bincode implementation, and [`FramedStream`], which carries buffered,
//! length-prefixed messages over one stream.
//!
//! # Example
//!
//! ```no_run
//! use tether_fabric::{codec::BincodeCodec, FramedStream, Host, TcpHost};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let host = TcpHost::builder()
//!     .id("alice")
//!     .peer("bob", "127.0.0.1:9000".parse()?)
//!     .build();
//!
//! let stream = host.open_stream(&"bob".into(), &"/echo/1.0.0".into()).await?;
//! let mut framed = FramedStream::new(stream, BincodeCodec);
//! framed.encode("hello").await?;
//! framed.flush().await?;
//! let reply: String = framed.decode().await?;
//! framed.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod framed;
pub mod host;
pub mod stream;

// Re-exports for convenience
pub use codec::{BincodeCodec, Codec};
pub use error::{Error, Result};
pub use framed::FramedStream;
pub use host::{
    Host, MemoryHost, MemoryNetwork, MemoryStream, TcpHost, TcpHostListener, TcpIncoming,
};
pub use stream::{BoxStream, Stream};
