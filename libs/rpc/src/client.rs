use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tether_core::{PeerId, ProtocolId, ServiceId};
use tether_fabric::{BincodeCodec, Codec, FramedStream, Host};
use tokio::sync::mpsc;

use crate::call::Call;
use crate::context::Context;
use crate::error::RpcError;
use crate::protocol::{Response, DEFAULT_PROTOCOL};
use crate::server::{Invocation, Server};

/// RPC client performing calls on remote peers or on a local [`Server`]
///
/// Calls to the empty peer id, or to the host's own id, go to the local
/// server when one is attached. Every other call opens a fresh stream to the
/// destination. Each call runs on its own task; the client itself holds no
/// per-call state and is cheap to clone.
#[derive(Clone)]
pub struct Client<C = BincodeCodec> {
    host: Option<Arc<dyn Host>>,
    protocol: ProtocolId,
    server: Option<Arc<dyn Server>>,
    codec: C,
}

pub(crate) enum Route {
    Local,
    Remote(Arc<dyn Host>),
}

impl Client {
    /// Create a client that performs remote calls through `host`
    ///
    /// Local calls fail with [`RpcError::NoServer`] until a server is
    /// attached, see [`Client::with_server`].
    pub fn new(host: Arc<dyn Host>, protocol: impl Into<ProtocolId>) -> Self {
        Self::builder().host(host).protocol(protocol).build()
    }

    /// Create a client that runs calls to itself on `server`
    ///
    /// `server` is assumed to share `host` with this client.
    pub fn with_server(
        host: Arc<dyn Host>,
        protocol: impl Into<ProtocolId>,
        server: Arc<dyn Server>,
    ) -> Self {
        Self::builder()
            .host(host)
            .protocol(protocol)
            .server(server)
            .build()
    }

    /// Create a client without a host, able to make local calls only
    pub fn local(server: Arc<dyn Server>) -> Self {
        Self::builder().server(server).build()
    }

    /// Create a builder for configuring the client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }
}

impl<C> Client<C>
where
    C: Codec + Clone + 'static,
{
    /// Identity of the host this client calls from, or the empty id
    pub fn id(&self) -> PeerId {
        self.host.as_ref().map(|h| h.id()).unwrap_or_default()
    }

    pub fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    /// Perform a call and wait for it to complete
    ///
    /// `reply` is overwritten with the decoded reply when one arrives and
    /// left as it was otherwise, including when the call task is lost.
    #[allow(clippy::too_many_arguments)]
    pub async fn call<A, R>(
        &self,
        ctx: Context,
        dest: impl Into<PeerId>,
        name: &str,
        method: &str,
        args: A,
        reply: &mut R,
    ) -> Result<(), RpcError>
    where
        A: Serialize + Send + Sync + 'static,
        R: DeserializeOwned + Default + Send + 'static,
    {
        let (done, mut completed) = mpsc::channel(1);
        let call = Call::new(
            ctx,
            dest.into(),
            ServiceId::new(name, method),
            args,
            R::default(),
            done,
        );
        self.start(call);

        match completed.recv().await {
            Some(call) => {
                if call.replied() {
                    *reply = call.reply;
                }
                call.error.map_or(Ok(()), Err)
            }
            None => Err(RpcError::Aborted),
        }
    }

    /// Start a call without waiting, returning the channel it completes on
    #[allow(clippy::too_many_arguments)]
    pub fn go<A, R>(
        &self,
        ctx: Context,
        dest: impl Into<PeerId>,
        name: &str,
        method: &str,
        args: A,
        reply: R,
    ) -> mpsc::Receiver<Call<A, R>>
    where
        A: Serialize + Send + Sync + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let (done, completed) = mpsc::channel(1);
        self.go_with(ctx, dest, name, method, args, reply, done);
        completed
    }

    /// Start a call without waiting; it is sent on `done` when complete
    ///
    /// # Panics
    ///
    /// Panics if `done` has no free capacity, and on a remote call when the
    /// client has no host or protocol.
    #[allow(clippy::too_many_arguments)]
    pub fn go_with<A, R>(
        &self,
        ctx: Context,
        dest: impl Into<PeerId>,
        name: &str,
        method: &str,
        args: A,
        reply: R,
        done: mpsc::Sender<Call<A, R>>,
    ) where
        A: Serialize + Send + Sync + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        assert_capacity(&done);
        let call = Call::new(
            ctx,
            dest.into(),
            ServiceId::new(name, method),
            args,
            reply,
            done,
        );
        self.start(call);
    }

    /// Spawn the task driving `call`
    ///
    /// Routing preconditions are checked here, on the caller's task, so a
    /// misconfigured client panics before anything is spawned.
    pub(crate) fn start<A, R>(&self, call: Call<A, R>)
    where
        A: Serialize + Send + Sync + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        tracing::debug!("dispatching {} to {:?}", call.service, call.dest.as_str());

        match self.route(&call.dest) {
            Route::Local => {
                let server = self.server.clone();
                let codec = self.codec.clone();
                let peer = self.id();
                tokio::spawn(call_local(server, codec, peer, call));
            }
            Route::Remote(host) => {
                let protocol = self.protocol.clone();
                let codec = self.codec.clone();
                tokio::spawn(call_remote(host, protocol, codec, call));
            }
        }
    }

    /// Decide where a call to `dest` runs
    ///
    /// # Panics
    ///
    /// Panics when `dest` is remote and the client has no host or protocol.
    pub(crate) fn route(&self, dest: &PeerId) -> Route {
        if dest.is_local_sentinel() || self.host.as_ref().is_some_and(|h| h.id() == *dest) {
            return Route::Local;
        }

        let Some(host) = self.host.clone() else {
            panic!("no host set: cannot perform remote call");
        };
        if self.protocol.is_empty() {
            panic!("no protocol set: cannot perform remote call");
        }
        Route::Remote(host)
    }
}

pub(crate) fn assert_capacity<T>(done: &mpsc::Sender<T>) {
    if done.capacity() == 0 {
        panic!("done channel has no capacity");
    }
}

async fn call_local<A, R, C>(
    server: Option<Arc<dyn Server>>,
    codec: C,
    peer: PeerId,
    mut call: Call<A, R>,
) where
    A: Serialize,
    R: DeserializeOwned,
    C: Codec,
{
    tracing::debug!("local call: {}", call.service);

    let Some(server) = server else {
        call.done_with_error(RpcError::NoServer).await;
        return;
    };

    let args = match codec.encode(&call.args) {
        Ok(args) => args,
        Err(e) => {
            call.done_with_error(RpcError::Encode(e)).await;
            return;
        }
    };

    let mut invocation = Invocation {
        ctx: call.ctx.clone(),
        peer,
        service: call.service.clone(),
        args,
        reply: None,
    };
    if let Err(e) = server.invoke(&mut invocation).await {
        call.set_error(e);
    }
    if let Some(reply) = invocation.reply {
        match codec.decode(&reply) {
            Ok(reply) => call.set_reply(reply),
            Err(e) => call.set_error(RpcError::Decode(e)),
        }
    }
    call.done().await;
}

async fn call_remote<A, R, C>(
    host: Arc<dyn Host>,
    protocol: ProtocolId,
    codec: C,
    mut call: Call<A, R>,
) where
    A: Serialize,
    R: DeserializeOwned,
    C: Codec,
{
    tracing::debug!("sending remote call");

    let opened = call
        .ctx
        .run(host.open_stream(&call.dest, &protocol))
        .await;
    let stream = match opened {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            let peer = call.dest.clone();
            call.done_with_error(RpcError::Connection { peer, source: e })
                .await;
            return;
        }
        Err(e) => {
            call.done_with_error(e).await;
            return;
        }
    };
    let mut framed = FramedStream::new(stream, codec);

    tracing::debug!("sending RPC {} to {}", call.service, call.dest);
    if let Err(e) = send_request(&mut framed, &call.ctx, &call.service, &call.args).await {
        framed.reset();
        call.done_with_error(e).await;
        return;
    }

    tracing::debug!("waiting response for {} from {}", call.service, call.dest);
    if receive_response(&mut framed, &mut call).await {
        if let Err(e) = framed.close().await {
            tracing::debug!("closing stream to {}: {}", call.dest, e);
        }
    } else {
        tracing::debug!("resetting stream to {}", call.dest);
        framed.reset();
    }
    call.done().await;
}

/// Write the service id and argument frames, then flush them to the peer
async fn send_request<A, C>(
    framed: &mut FramedStream<C>,
    ctx: &Context,
    service: &ServiceId,
    args: &A,
) -> Result<(), RpcError>
where
    A: Serialize,
    C: Codec,
{
    let written = ctx
        .run(async {
            framed.encode(service).await?;
            framed.encode(args).await?;
            framed.flush().await
        })
        .await?;
    written.map_err(RpcError::Encode)
}

/// Read the response header and drain the reply frame into `call`
///
/// Returns whether the stream can be closed gracefully. The reply decode
/// error, if any, replaces a server-reported error. An empty reply frame
/// means the server produced no reply, and a stream that ends where the
/// reply would start is tolerated; both leave the call as it is.
async fn receive_response<A, R, C>(framed: &mut FramedStream<C>, call: &mut Call<A, R>) -> bool
where
    R: DeserializeOwned,
    C: Codec,
{
    let ctx = call.ctx.clone();

    let response: Response = match ctx.run(framed.decode()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            call.set_error(RpcError::Decode(e));
            return false;
        }
        Err(e) => {
            call.set_error(e);
            return false;
        }
    };

    if !response.error.is_empty() {
        call.set_error(RpcError::Remote(response.error));
    }

    // The reply frame is sent even on error and must be read.
    let bytes = match ctx.run(framed.read_frame()).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) if e.is_closed() => return true,
        Ok(Err(e)) => {
            call.set_error(RpcError::Decode(e));
            return false;
        }
        Err(e) => {
            call.set_error(e);
            return false;
        }
    };
    if bytes.is_empty() {
        return true;
    }

    match framed.codec().decode::<R>(&bytes) {
        Ok(reply) => {
            call.set_reply(reply);
            true
        }
        Err(e) => {
            call.set_error(RpcError::Decode(e));
            false
        }
    }
}

/// Builder for configuring a [`Client`]
pub struct ClientBuilder<C = BincodeCodec> {
    host: Option<Arc<dyn Host>>,
    protocol: ProtocolId,
    server: Option<Arc<dyn Server>>,
    codec: C,
}

impl ClientBuilder {
    /// Create a new builder using bincode and the default protocol id
    pub fn new() -> Self {
        Self {
            host: None,
            protocol: ProtocolId::from(DEFAULT_PROTOCOL),
            server: None,
            codec: BincodeCodec,
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ClientBuilder<C> {
    /// Set the host used to open streams to remote peers
    pub fn host(mut self, host: Arc<dyn Host>) -> Self {
        self.host = Some(host);
        self
    }

    /// Set the protocol id; it must match the one remote servers listen on
    pub fn protocol(mut self, protocol: impl Into<ProtocolId>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Attach the server that handles calls to this client's own id
    pub fn server(mut self, server: Arc<dyn Server>) -> Self {
        self.server = Some(server);
        self
    }

    /// Use a different codec for arguments and replies
    pub fn codec<D: Codec>(self, codec: D) -> ClientBuilder<D> {
        ClientBuilder {
            host: self.host,
            protocol: self.protocol,
            server: self.server,
            codec,
        }
    }

    pub fn build(self) -> Client<C> {
        Client {
            host: self.host,
            protocol: self.protocol,
            server: self.server,
            codec: self.codec,
        }
    }
}
