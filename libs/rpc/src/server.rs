//! The server side boundary: what a local or remote call is handed to.
//!
//! Service registration is not part of this crate. Anything implementing
//! [`Server`] can back a [`Client`](crate::Client) for local calls, and
//! [`serve_stream`] runs the responder half of the wire protocol on top of
//! the same trait.

use std::sync::Arc;

use tether_core::{PeerId, ProtocolId, ServiceId};
use tether_fabric::host::Inbound;
use tether_fabric::{BoxStream, Codec, FramedStream, Stream, TcpHostListener};
use tokio::sync::mpsc;

use crate::context::Context;
use crate::error::RpcError;
use crate::protocol::Response;

/// A request as seen by a [`Server`]
///
/// Arguments and reply travel in codec-encoded form so one server
/// implementation answers local and remote callers alike.
#[derive(Debug)]
pub struct Invocation {
    pub ctx: Context,
    /// Identity of the calling peer
    pub peer: PeerId,
    pub service: ServiceId,
    pub args: Vec<u8>,
    /// Encoded reply, if the method produced one
    pub reply: Option<Vec<u8>>,
}

/// Executes invocations against registered services
#[async_trait::async_trait]
pub trait Server: Send + Sync {
    /// Run the method named by `invocation.service`, storing any reply in
    /// `invocation.reply`
    async fn invoke(&self, invocation: &mut Invocation) -> Result<(), RpcError>;
}

/// Answer one request arriving on `stream`
///
/// Reads the service id and argument frames, invokes `server` and writes the
/// response header followed by the reply frame. The reply frame is always
/// written; it is empty when the server produced no reply.
pub async fn serve_stream<C: Codec>(
    server: &dyn Server,
    codec: C,
    stream: BoxStream,
    peer: PeerId,
) -> Result<(), RpcError> {
    let mut framed = FramedStream::new(stream, codec);

    let request = read_request(&mut framed).await;
    let (service, args) = match request {
        Ok(request) => request,
        Err(e) => {
            framed.reset();
            return Err(RpcError::Decode(e));
        }
    };

    tracing::debug!("serving {} for {}", service, peer);

    let mut invocation = Invocation {
        ctx: Context::background(),
        peer,
        service,
        args,
        reply: None,
    };
    let error = match server.invoke(&mut invocation).await {
        Ok(()) => String::new(),
        Err(e) => e.to_string(),
    };

    if let Err(e) = write_response(&mut framed, error, invocation.reply.as_deref()).await {
        framed.reset();
        return Err(RpcError::Encode(e));
    }
    framed.close().await.map_err(RpcError::Encode)
}

async fn read_request<C: Codec>(
    framed: &mut FramedStream<C>,
) -> tether_fabric::Result<(ServiceId, Vec<u8>)> {
    let service = framed.decode().await?;
    let args = framed.read_frame().await?;
    Ok((service, args))
}

async fn write_response<C: Codec>(
    framed: &mut FramedStream<C>,
    error: String,
    reply: Option<&[u8]>,
) -> tether_fabric::Result<()> {
    framed.encode(&Response { error }).await?;
    framed.write_frame(reply.unwrap_or_default()).await?;
    framed.flush().await
}

/// Accept streams from a TCP listener forever, serving each on its own task
///
/// The handshake is read on the connection's task, so one silent dialer
/// cannot block the accept loop.
pub async fn serve_tcp<C>(server: Arc<dyn Server>, codec: C, listener: TcpHostListener)
where
    C: Codec + Clone + 'static,
{
    loop {
        let incoming = match listener.accept().await {
            Ok(incoming) => incoming,
            Err(e) => {
                tracing::warn!("failed to accept stream: {}", e);
                continue;
            }
        };

        let server = server.clone();
        let codec = codec.clone();
        tokio::spawn(async move {
            let addr = incoming.peer_addr();
            match incoming.handshake().await {
                Ok((stream, peer)) => serve_logged(server.as_ref(), codec, stream, peer).await,
                Err(e) => tracing::warn!("handshake with {} failed: {}", addr, e),
            }
        });
    }
}

/// Serve the inbound streams of a memory host until its network drops it
pub async fn serve_memory<C>(
    server: Arc<dyn Server>,
    codec: C,
    protocol: ProtocolId,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) where
    C: Codec + Clone + 'static,
{
    while let Some((stream_protocol, peer, mut stream)) = inbound.recv().await {
        if stream_protocol != protocol {
            tracing::warn!("rejecting stream from {} for protocol {}", peer, stream_protocol);
            stream.reset();
            continue;
        }
        spawn_serve(server.clone(), codec.clone(), stream, peer);
    }
}

fn spawn_serve<C>(server: Arc<dyn Server>, codec: C, stream: BoxStream, peer: PeerId)
where
    C: Codec + 'static,
{
    tokio::spawn(async move { serve_logged(server.as_ref(), codec, stream, peer).await });
}

async fn serve_logged<C: Codec>(server: &dyn Server, codec: C, stream: BoxStream, peer: PeerId) {
    if let Err(e) = serve_stream(server, codec, stream, peer).await {
        tracing::debug!("serving stream failed: {}", e);
    }
}
