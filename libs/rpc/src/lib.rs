//! Tether RPC - call dispatch over peer-to-peer streams
//!
//! A [`Client`] invokes `Service.Method` on a destination peer, or on a local
//! [`Server`] when the destination is empty or the client's own id. Remote
//! calls open a fresh stream per call and exchange four frames:
//!
//! | Frame | Contents |
//! |---|---|
//! | request header | [`ServiceId`](tether_core::ServiceId) |
//! | request body | arguments |
//! | response header | [`Response`] (empty error = success) |
//! | response body | reply, always sent |
//!
//! Every call can be cancelled through its [`Context`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_fabric::TcpHost;
//! use tether_rpc::{Client, Context, DEFAULT_PROTOCOL};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let host = TcpHost::builder()
//!     .id("alice")
//!     .peer("bob", "127.0.0.1:9000".parse()?)
//!     .build();
//! let client = Client::new(Arc::new(host), DEFAULT_PROTOCOL);
//!
//! let mut reply = String::new();
//! let ctx = Context::background().with_timeout(std::time::Duration::from_secs(5));
//! client
//!     .call(ctx, "bob", "Echo", "Say", "hi".to_string(), &mut reply)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod client;
pub mod context;
pub mod error;
mod fanout;
pub mod protocol;
pub mod server;

// Re-exports for convenience
pub use call::Call;
pub use client::{Client, ClientBuilder};
pub use context::Context;
pub use error::{Result, RpcError};
pub use protocol::{Response, DEFAULT_PROTOCOL};
pub use server::{serve_memory, serve_stream, serve_tcp, Invocation, Server};
pub use tether_core::{PeerId, ProtocolId, ServiceId};
pub use tokio_util::sync::CancellationToken;
