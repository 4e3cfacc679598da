//! RPC forwarding tests
//!
//! An rpc endpoint is served by the session that created it. Calls from
//! other sessions are forwarded to it and its answer is routed back to the
//! caller under the caller's own transaction id.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use ptree_client::{Client, ClientConfig, ClientEvent, ClientEvents};
use ptree_proto::PropertyType;
use ptree_server::{Server, ServerConfig};

const WAIT: Duration = Duration::from_secs(5);

async fn signed_in(server: &Server) -> (Client, ClientEvents) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    server.spawn_session(remote, SocketAddr::from(([127, 0, 0, 1], 40000)));
    let (client, events) = Client::from_stream(local, ClientConfig::default());
    assert_eq!(client.signin().await.unwrap(), 1);
    (client, events)
}

/// Answer every call with the reversed parameter until the events end.
fn serve_reversed(handler: Arc<Client>, mut events: ClientEvents) -> tokio::task::JoinHandle<usize> {
    tokio::spawn(async move {
        let mut served = 0;
        while let Some(event) = events.recv().await {
            if let ClientEvent::RpcCall(call) = event {
                let mut answer = call.parameter.to_vec();
                answer.reverse();
                if handler.respond_rpc(&call, answer).await.is_err() {
                    break;
                }
                served += 1;
            }
        }
        served
    })
}

#[tokio::test]
async fn call_is_answered_by_owner() {
    let server = Server::new(ServerConfig::default());
    let (handler, handler_events) = signed_in(&server).await;
    let (caller, _caller_events) = signed_in(&server).await;

    let uuid = handler.create("/reverse", PropertyType::Rpc, Bytes::new()).await.unwrap();
    let handler = Arc::new(handler);
    let served = serve_reversed(Arc::clone(&handler), handler_events);

    let answer = tokio::time::timeout(WAIT, caller.rpc(uuid, "abc")).await.unwrap().unwrap();
    assert_eq!(&answer[..], b"cba");

    let answer = tokio::time::timeout(WAIT, caller.rpc(uuid, "xy")).await.unwrap().unwrap();
    assert_eq!(&answer[..], b"yx");

    handler.close();
    assert_eq!(tokio::time::timeout(WAIT, served).await.unwrap().unwrap(), 2);
}

#[tokio::test]
async fn concurrent_calls_keep_their_answers() {
    let server = Server::new(ServerConfig::default());
    let (handler, handler_events) = signed_in(&server).await;
    let (caller, _caller_events) = signed_in(&server).await;

    let uuid = handler.create("/reverse", PropertyType::Rpc, Bytes::new()).await.unwrap();
    let _served = serve_reversed(Arc::new(handler), handler_events);

    let caller = Arc::new(caller);
    let calls: Vec<_> = (0..8u8)
        .map(|i| {
            let caller = Arc::clone(&caller);
            tokio::spawn(async move { (i, caller.rpc(uuid, vec![i, 0xff]).await) })
        })
        .collect();

    for call in calls {
        let (i, answer) = tokio::time::timeout(WAIT, call).await.unwrap().unwrap();
        assert_eq!(&answer.unwrap()[..], &[0xff, i]);
    }
}

#[tokio::test]
async fn unreachable_endpoints_answer_empty() {
    let server = Server::new(ServerConfig::default());
    let (owner, _owner_events) = signed_in(&server).await;
    let (caller, _caller_events) = signed_in(&server).await;

    let value = owner.create("/value", PropertyType::Value, vec![1u8]).await.unwrap();
    let endpoint = owner.create("/call", PropertyType::Rpc, Bytes::new()).await.unwrap();

    assert!(caller.rpc(9999, "x").await.unwrap().is_empty());
    assert!(caller.rpc(value, "x").await.unwrap().is_empty());

    drop(owner);
    tokio::time::timeout(WAIT, async {
        while server.registry().len() > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // The endpoint stays in the tree but nobody serves it.
    let answer = tokio::time::timeout(WAIT, caller.rpc(endpoint, "x")).await.unwrap().unwrap();
    assert!(answer.is_empty());
}

#[tokio::test]
async fn handler_leaving_mid_call_answers_empty() {
    let server = Server::new(ServerConfig::default());
    let (handler, mut handler_events) = signed_in(&server).await;
    let (caller, _caller_events) = signed_in(&server).await;
    let endpoint = handler.create("/call", PropertyType::Rpc, Bytes::new()).await.unwrap();

    let caller = Arc::new(caller);
    let pending = tokio::spawn({
        let caller = Arc::clone(&caller);
        async move { caller.rpc(endpoint, "x").await }
    });

    // Take the call, then leave without answering.
    loop {
        match tokio::time::timeout(WAIT, handler_events.recv()).await.unwrap() {
            Some(ClientEvent::RpcCall(_)) => break,
            Some(_) => {},
            None => panic!("event channel closed"),
        }
    }
    drop(handler);

    let answer = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap().unwrap();
    assert!(answer.is_empty());
}
