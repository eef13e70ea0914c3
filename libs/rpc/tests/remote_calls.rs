mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{client, spawn_echo_peer, spawn_silent_peer};
use serde::{Deserialize, Serialize};
use tether_fabric::{BincodeCodec, Error, FramedStream, Host, MemoryNetwork};
use tether_rpc::{
    CancellationToken, Client, Context, PeerId, ProtocolId, Response, RpcError, ServiceId,
    DEFAULT_PROTOCOL,
};
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Reading {
    sensor: String,
    values: Vec<f64>,
    note: Option<String>,
}

#[tokio::test]
async fn remote_echo_round_trip() {
    let network = MemoryNetwork::new();
    let server = spawn_echo_peer(&network, "bob");
    let alice = client(&network, "alice");

    let mut reply = String::new();
    alice
        .call(Context::background(), "bob", "Echo", "Say", "hi".to_string(), &mut reply)
        .await
        .unwrap();

    assert_eq!(reply, "hi");
    assert_eq!(server.count(), 1);
}

#[tokio::test]
async fn structured_reply_survives_the_wire() {
    let network = MemoryNetwork::new();
    spawn_echo_peer(&network, "bob");
    let alice = client(&network, "alice");

    let sent = Reading {
        sensor: "thermo-1".into(),
        values: vec![20.5, -3.25, 1e9],
        note: Some("calibrated".into()),
    };
    let mut reply = Reading::default();
    alice
        .call(Context::background(), "bob", "Echo", "Mirror", sent.clone(), &mut reply)
        .await
        .unwrap();

    assert_eq!(reply, sent);
}

#[tokio::test]
async fn remote_error_keeps_drained_reply() {
    let network = MemoryNetwork::new();
    spawn_echo_peer(&network, "bob");
    let alice = client(&network, "alice");

    let mut reply = String::new();
    let err = alice
        .call(Context::background(), "bob", "Echo", "Fail", (), &mut reply)
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::Remote(ref msg) if msg == "echo failed"));
    assert_eq!(reply, "partial");
}

#[tokio::test]
async fn no_reply_leaves_caller_value() {
    let network = MemoryNetwork::new();
    spawn_echo_peer(&network, "bob");
    let alice = client(&network, "alice");

    let mut reply = String::from("untouched");
    let err = alice
        .call(Context::background(), "bob", "Echo", "NoReply", (), &mut reply)
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::Remote(ref msg) if msg == "nothing to say"));
    assert_eq!(reply, "untouched");
}

#[tokio::test]
async fn server_without_reply_still_sends_empty_reply_frame() {
    let network = MemoryNetwork::new();
    spawn_echo_peer(&network, "bob");
    let (alice, _inbound) = network.host("alice");

    let stream = alice
        .open_stream(&PeerId::from("bob"), &ProtocolId::from(DEFAULT_PROTOCOL))
        .await
        .unwrap();
    let mut framed = FramedStream::new(stream, BincodeCodec);
    framed.encode(&ServiceId::new("Echo", "NoReply")).await.unwrap();
    framed.encode(&()).await.unwrap();
    framed.flush().await.unwrap();

    let response: Response = framed.decode().await.unwrap();
    assert_eq!(response.error, "nothing to say");
    assert_eq!(framed.read_frame().await.unwrap(), Vec::<u8>::new());
    assert!(matches!(framed.read_frame().await, Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn stream_ending_after_header_is_tolerated() {
    let network = MemoryNetwork::new();
    let mut inbound = spawn_silent_peer(&network, "bob");
    let alice = client(&network, "alice");

    // Answers with a header only, then closes gracefully
    tokio::spawn(async move {
        let (_protocol, _peer, stream) = inbound.recv().await.unwrap();
        let mut framed = FramedStream::new(stream, BincodeCodec);
        framed.read_frame().await.unwrap();
        framed.read_frame().await.unwrap();
        framed
            .encode(&Response {
                error: "short answer".into(),
            })
            .await
            .unwrap();
        framed.close().await.unwrap();
    });

    let mut reply = String::from("untouched");
    let err = alice
        .call(Context::background(), "bob", "Echo", "Say", "hi".to_string(), &mut reply)
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::Remote(ref msg) if msg == "short answer"));
    assert_eq!(reply, "untouched");
}

#[tokio::test]
async fn failed_request_write_is_encode_error() {
    let network = MemoryNetwork::new();
    let mut inbound = spawn_silent_peer(&network, "bob");
    let alice = client(&network, "alice");

    // Drop every stream unread; the arguments exceed the pipe buffer
    tokio::spawn(async move {
        while let Some((_protocol, _peer, stream)) = inbound.recv().await {
            drop(stream);
        }
    });

    let mut reply = Vec::<u8>::new();
    let err = alice
        .call(Context::background(), "bob", "Echo", "Mirror", vec![0u8; 1 << 20], &mut reply)
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::Encode(_)), "got {:?}", err);
    assert!(reply.is_empty());
}

#[tokio::test]
async fn malformed_response_header_is_decode_error_and_resets() {
    let network = MemoryNetwork::new();
    let mut inbound = spawn_silent_peer(&network, "bob");
    let alice = client(&network, "alice");

    let (seen_tx, seen_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (_protocol, _peer, stream) = inbound.recv().await.unwrap();
        let mut framed = FramedStream::new(stream, BincodeCodec);
        framed.read_frame().await.unwrap();
        framed.read_frame().await.unwrap();

        // Too short to hold a response header
        framed.write_frame(&[0xff]).await.unwrap();
        framed.flush().await.unwrap();

        let _ = seen_tx.send(framed.read_frame().await);
    });

    let mut reply = String::from("untouched");
    let err = alice
        .call(Context::background(), "bob", "Echo", "Say", "hi".to_string(), &mut reply)
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::Decode(_)), "got {:?}", err);
    assert_eq!(reply, "untouched");

    let seen = tokio::time::timeout(Duration::from_secs(2), seen_rx)
        .await
        .expect("peer never saw the stream end")
        .unwrap();
    match seen {
        Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
        other => panic!("Expected the stream to be reset, got {:?}", other),
    }
}

#[tokio::test]
async fn reply_decode_error_overrides_remote_error() {
    let network = MemoryNetwork::new();
    spawn_echo_peer(&network, "bob");
    let alice = client(&network, "alice");

    let mut reply = 7u64;
    let err = alice
        .call(Context::background(), "bob", "Echo", "Garbage", (), &mut reply)
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::Decode(_)), "got {:?}", err);
    assert_eq!(reply, 7);
}

#[tokio::test]
async fn unknown_peer_is_connection_error() {
    let network = MemoryNetwork::new();
    let alice = client(&network, "alice");

    let mut reply = String::new();
    let err = alice
        .call(Context::background(), "nobody", "Echo", "Say", "hi".to_string(), &mut reply)
        .await
        .unwrap_err();

    match err {
        RpcError::Connection { peer, .. } => assert_eq!(peer.as_str(), "nobody"),
        other => panic!("expected connection error, got {:?}", other),
    }
}

#[tokio::test]
async fn foreign_protocol_fails_the_call() {
    let network = MemoryNetwork::new();
    let server = spawn_echo_peer(&network, "bob");
    let (host, _inbound) = network.host("alice");
    let alice = Client::new(Arc::new(host), "/other/9.9.9");

    let mut reply = String::new();
    let err = alice
        .call(Context::background(), "bob", "Echo", "Say", "hi".to_string(), &mut reply)
        .await
        .unwrap_err();

    assert!(
        matches!(err, RpcError::Encode(_) | RpcError::Decode(_)),
        "got {:?}",
        err
    );
    assert_eq!(server.count(), 0);
}

#[tokio::test]
async fn cancellation_releases_the_stream() {
    let network = MemoryNetwork::new();
    let mut inbound = spawn_silent_peer(&network, "bob");
    let alice = client(&network, "alice");

    // Read the request, then wait for the client to let go of the stream.
    let (released_tx, released_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (_protocol, _peer, mut stream) = inbound.recv().await.unwrap();
        let mut buf = [0u8; 1024];
        while stream.read(&mut buf).await.map(|n| n > 0).unwrap_or(false) {}
        let _ = released_tx.send(());
    });

    let metrics = tokio::runtime::Handle::current().metrics();
    let tasks_before = metrics.num_alive_tasks();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let mut reply = String::new();
    let err = alice
        .call(Context::new(token), "bob", "Echo", "Say", "hi".to_string(), &mut reply)
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::Cancelled), "got {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(2));

    tokio::time::timeout(Duration::from_secs(2), released_rx)
        .await
        .expect("stream was not released")
        .unwrap();

    // The call task and the canceller are gone; nothing keeps watching.
    tokio::time::timeout(Duration::from_secs(2), async {
        while metrics.num_alive_tasks() > tasks_before {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("call left tasks behind");
}

#[tokio::test]
async fn deadline_expires_while_waiting_for_response() {
    let network = MemoryNetwork::new();
    let _inbound = spawn_silent_peer(&network, "bob");
    let alice = client(&network, "alice");

    let ctx = Context::background().with_timeout(Duration::from_millis(50));
    let mut reply = String::new();
    let err = alice
        .call(ctx, "bob", "Echo", "Say", "hi".to_string(), &mut reply)
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::DeadlineExceeded), "got {:?}", err);
    assert!(err.is_cancellation());
}

#[tokio::test]
async fn cancelled_context_never_reaches_the_server() {
    let network = MemoryNetwork::new();
    let server = spawn_echo_peer(&network, "bob");
    let alice = client(&network, "alice");

    let token = CancellationToken::new();
    token.cancel();

    let mut reply = String::new();
    let err = alice
        .call(Context::new(token), "bob", "Echo", "Say", "hi".to_string(), &mut reply)
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::Cancelled));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(server.count(), 0);
}

#[tokio::test]
async fn cancelling_after_completion_is_a_no_op() {
    let network = MemoryNetwork::new();
    spawn_echo_peer(&network, "bob");
    let alice = client(&network, "alice");

    let token = CancellationToken::new();
    let mut reply = String::new();
    alice
        .call(Context::new(token.clone()), "bob", "Echo", "Say", "hi".to_string(), &mut reply)
        .await
        .unwrap();
    token.cancel();

    assert_eq!(reply, "hi");
}

#[tokio::test]
async fn server_stalling_past_cancel_does_not_block_caller() {
    let network = MemoryNetwork::new();
    spawn_echo_peer(&network, "bob");
    let alice = client(&network, "alice");

    let ctx = Context::background().with_timeout(Duration::from_millis(100));
    let mut reply = ();
    let started = Instant::now();
    let err = alice
        .call(ctx, "bob", "Echo", "Stall", (), &mut reply)
        .await
        .unwrap_err();

    assert!(err.is_cancellation());
    assert!(started.elapsed() < Duration::from_secs(5));
}
