//! VI. Async queue cancellation.
//!
//! Rules covered:
//! - 21. Queued lookups reach the server one at a time, in order
//! - 22. A cancelled queued lookup never reaches the server
//! - 23. A cancelled in-flight lookup is compensated with an unload

use super::harness::{icon_key, settle, MockThemeServer, ServerResponse};
use crate::AsyncRequestQueue;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use theme_ipc::{Reply, Request};

fn lookups_and_unloads(server: &MockThemeServer) -> Vec<String> {
    server
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            Request::IconLookup(key) => Some(format!("lookup:{}", key.id.path)),
            Request::UnloadIcon(id) => Some(format!("unload:{}", id.path)),
            _ => None,
        })
        .collect()
}

/// Rule 21: Queued lookups reach the server one at a time, in order
#[tokio::test]
async fn rule_21_fifo_through_client() {
    let server = MockThemeServer::new();
    let handle = server.start();
    let client = server.client();
    let queue = AsyncRequestQueue::new(client.clone());

    let results = Arc::new(Mutex::new(Vec::new()));
    for name in ["one", "two", "three"] {
        let info = server.store_svg(name.as_bytes());
        server.queue_response(ServerResponse::DelayThenReply(
            Duration::from_millis(10),
            Reply::Icon(info),
        ));
        let results = results.clone();
        queue.enqueue(icon_key(name), move |got| {
            assert_eq!(got, info);
            results.lock().unwrap().push(name);
        });
    }
    queue.wait_idle().await;

    assert_eq!(*results.lock().unwrap(), vec!["one", "two", "three"]);
    assert_eq!(
        lookups_and_unloads(&server),
        vec!["lookup:one", "lookup:two", "lookup:three"]
    );
    handle.abort();
}

/// Rule 22: A cancelled queued lookup never reaches the server
#[tokio::test]
async fn rule_22_cancel_queued() {
    let server = MockThemeServer::new();
    let handle = server.start();
    let client = server.client();
    let queue = AsyncRequestQueue::new(client.clone());

    server.queue_response(ServerResponse::DelayThenReply(
        Duration::from_millis(100),
        Reply::Icon(server.store_svg(b"first")),
    ));
    let called = Arc::new(Mutex::new(Vec::new()));
    let c1 = called.clone();
    queue.enqueue(icon_key("first"), move |_| c1.lock().unwrap().push("first"));
    let c2 = called.clone();
    let second = queue.enqueue(icon_key("second"), move |_| c2.lock().unwrap().push("second"));

    settle().await;
    assert!(queue.cancel(second));
    queue.wait_idle().await;

    assert_eq!(*called.lock().unwrap(), vec!["first"]);
    assert_eq!(lookups_and_unloads(&server), vec!["lookup:first"]);
    handle.abort();
}

/// Rule 23: A cancelled in-flight lookup is compensated with an unload
#[tokio::test]
async fn rule_23_cancel_in_flight_unloads() {
    let server = MockThemeServer::new();
    let handle = server.start();
    let client = server.client();
    let queue = AsyncRequestQueue::new(client.clone());

    server.queue_response(ServerResponse::DelayThenReply(
        Duration::from_millis(100),
        Reply::Icon(server.store_svg(b"<svg/>")),
    ));
    let called = Arc::new(Mutex::new(false));
    let flag = called.clone();
    let ticket = queue.enqueue(icon_key("qtg_anim_loading"), move |_| {
        *flag.lock().unwrap() = true;
    });

    settle().await;
    assert_eq!(queue.pending(), 1);
    assert!(queue.cancel(ticket));
    queue.wait_idle().await;

    assert!(!*called.lock().unwrap());
    assert_eq!(
        lookups_and_unloads(&server),
        vec!["lookup:qtg_anim_loading", "unload:qtg_anim_loading"]
    );
    handle.abort();
}
