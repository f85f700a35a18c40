//! I. Transport & request ids.
//!
//! Rules covered:
//! - 1. A lookup round-trips through the stream binding
//! - 2. The call binding pairs concurrent replies by id
//! - 3. Request ids carry the connection epoch and a rising sequence
//! - 4. A new connection gets a new epoch

use super::harness::{icon_key, settle, MockThemeServer, ServerResponse};
use crate::demux::RequestIds;
use crate::transport::TransportKind;
use crate::{ConnectionState, ThemeClient};
use std::sync::Arc;
use std::time::Duration;
use theme_ipc::{Reply, Request, SharedIconInfo};

/// Rule 1: A lookup round-trips through the stream binding
#[tokio::test]
async fn rule_01_stream_lookup_round_trip() {
    let server = MockThemeServer::new();
    let handle = server.start();
    let client = server.client();

    let info = server.store_svg(b"<svg id='star'/>");
    server.queue_response(ServerResponse::Reply(Reply::Icon(info)));

    let got = client.icon_lookup(&icon_key("qtg_small_star")).await;
    assert_eq!(got, info);
    assert_eq!(client.state(), ConnectionState::Connected);

    let bytes = client.resource_bytes(&got.handle().unwrap()).unwrap();
    assert_eq!(bytes, b"<svg id='star'/>");

    match &server.requests()[..] {
        [Request::IconLookup(key)] => assert_eq!(key.id.path, "qtg_small_star"),
        other => panic!("unexpected requests {:?}", other),
    }
    handle.abort();
}

/// Rule 2: The call binding pairs concurrent replies by id
#[tokio::test]
async fn rule_02_call_binding_concurrent_calls() {
    let server = MockThemeServer::new();
    let handle = server.start();
    let client = Arc::new(ThemeClient::new(server.options(TransportKind::Call)));

    // Connect first so the scripted replies line up with the lookups.
    assert!(client.reconnect().await);

    let infos: Vec<SharedIconInfo> = (0..4)
        .map(|i| server.store_svg(format!("<svg id='{}'/>", i).as_bytes()))
        .collect();
    for info in &infos {
        server.queue_response(ServerResponse::DelayThenReply(
            Duration::from_millis(5),
            Reply::Icon(*info),
        ));
    }

    let mut tasks = Vec::new();
    for i in 0..4 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client.icon_lookup(&icon_key(&format!("icon_{}", i))).await
        }));
    }
    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    // Every call got exactly one of the scripted replies.
    assert!(results.iter().all(|r| r.is_valid()));
    for info in &infos {
        assert_eq!(results.iter().filter(|r| *r == info).count(), 1);
    }
    handle.abort();
}

/// Rule 3: Request ids carry the connection epoch and a rising sequence
#[tokio::test]
async fn rule_03_request_ids_epoch_tagged() {
    let server = MockThemeServer::new();
    let handle = server.start();
    let client = server.client();

    client.free_shared_memory().await;
    client.allocated_heap_memory().await;

    let received = server.received();
    assert_eq!(received.len(), 3, "handshake plus two queries");
    let epoch = RequestIds::epoch_of(received[0].request_id);
    assert_ne!(epoch, 0);
    for pair in received.windows(2) {
        assert_eq!(RequestIds::epoch_of(pair[1].request_id), epoch);
        assert!(pair[1].request_id > pair[0].request_id);
    }
    assert_eq!(received[0].request_id & 0xffff_ffff, 1);
    handle.abort();
}

/// Rule 4: A new connection gets a new epoch
#[tokio::test]
async fn rule_04_reconnect_bumps_epoch() {
    let server = MockThemeServer::new();
    let handle = server.start();
    let client = server.client();

    client.free_shared_memory().await;
    assert!(client.reconnect().await);
    client.free_shared_memory().await;
    settle().await;

    let received = server.received();
    let first = RequestIds::epoch_of(received.first().unwrap().request_id);
    let last = RequestIds::epoch_of(received.last().unwrap().request_id);
    assert!(last > first);
    assert_eq!(server.connection_count(), 2);
    handle.abort();
}
