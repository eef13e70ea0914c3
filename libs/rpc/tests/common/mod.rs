#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tether_fabric::host::Inbound;
use tether_fabric::{BincodeCodec, Codec, MemoryNetwork};
use tether_rpc::{serve_memory, Client, Invocation, RpcError, Server, DEFAULT_PROTOCOL};
use tokio::sync::mpsc;

/// Test service answering `Echo.*` methods
#[derive(Default)]
pub struct EchoServer {
    pub invocations: AtomicUsize,
}

impl EchoServer {
    pub fn count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Server for EchoServer {
    async fn invoke(&self, inv: &mut Invocation) -> Result<(), RpcError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if inv.service.name != "Echo" {
            return Err(RpcError::service(format!("unknown service {}", inv.service.name)));
        }

        match inv.service.method.as_str() {
            // Decode a string and send it back
            "Say" => {
                let said: String = BincodeCodec
                    .decode(&inv.args)
                    .map_err(|e| RpcError::service(e.to_string()))?;
                inv.reply = Some(BincodeCodec.encode(&said).map_err(RpcError::Encode)?);
                Ok(())
            }
            // Reply with the raw arguments, whatever their type
            "Mirror" => {
                inv.reply = Some(inv.args.clone());
                Ok(())
            }
            "Nap" => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                inv.reply = Some(inv.args.clone());
                Ok(())
            }
            "Fail" => {
                inv.reply = Some(BincodeCodec.encode("partial").map_err(RpcError::Encode)?);
                Err(RpcError::service("echo failed"))
            }
            "NoReply" => Err(RpcError::service("nothing to say")),
            "Garbage" => {
                inv.reply = Some(vec![1, 2, 3]);
                Err(RpcError::service("garbage follows"))
            }
            "Stall" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
            other => Err(RpcError::service(format!("unknown method {}", other))),
        }
    }
}

/// Join `network` as `id` with an [`EchoServer`] answering inbound streams
pub fn spawn_echo_peer(network: &MemoryNetwork, id: &str) -> Arc<EchoServer> {
    let (_host, inbound) = network.host(id);
    let server = Arc::new(EchoServer::default());
    tokio::spawn(serve_memory(
        server.clone() as Arc<dyn Server>,
        BincodeCodec,
        DEFAULT_PROTOCOL.into(),
        inbound,
    ));
    server
}

/// Join `network` as `id` and hand every inbound stream to the test
///
/// The streams are never answered.
pub fn spawn_silent_peer(network: &MemoryNetwork, id: &str) -> mpsc::UnboundedReceiver<Inbound> {
    let (_host, inbound) = network.host(id);
    inbound
}

/// A client on `network` called `id`, without a local server
pub fn client(network: &MemoryNetwork, id: &str) -> Client {
    let (host, _inbound) = network.host(id);
    Client::new(Arc::new(host), DEFAULT_PROTOCOL)
}
