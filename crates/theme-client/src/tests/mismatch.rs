//! IV. Protocol mismatch handling.
//!
//! Rules covered:
//! - 13. A handshake with another protocol version fails closed
//! - 14. An empty reply body reads as not found; the connection stays up
//! - 15. A reply with the wrong shape reads as not found
//! - 16. A multi-icon reply with the wrong length is discarded

use super::harness::{icon_key, MockThemeServer, ServerResponse};
use crate::ConnectionState;
use theme_ipc::{
    AspectRatioMode, IconMode, MultiIconRequest, RenderingMode, Reply, SharedIconInfo, SizeF,
    PROTOCOL_VERSION,
};

/// Rule 13: A handshake with another protocol version fails closed
#[tokio::test]
async fn rule_13_version_mismatch_stays_disconnected() {
    let server = MockThemeServer::new();
    server.set_protocol_version(PROTOCOL_VERSION + 1);
    let handle = server.start();
    let client = server.client();

    assert!(!client.icon_lookup(&icon_key("qtg_large_info")).await.is_valid());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.server_info().is_none());
    // Only handshakes reached the server.
    assert!(server.requests().is_empty());
    handle.abort();
}

/// Rule 14: An empty reply body reads as not found; the connection stays up
#[tokio::test]
async fn rule_14_empty_reply_is_not_found() {
    let server = MockThemeServer::new();
    let handle = server.start();
    let client = server.client();

    server.queue_response(ServerResponse::Empty);
    assert!(!client.icon_lookup(&icon_key("qtg_large_info")).await.is_valid());

    let info = server.store_svg(b"<svg/>");
    server.queue_response(ServerResponse::Reply(Reply::Icon(info)));
    assert_eq!(client.icon_lookup(&icon_key("qtg_large_info")).await, info);
    assert_eq!(server.connection_count(), 1);
    handle.abort();
}

/// Rule 15: A reply with the wrong shape reads as not found
#[tokio::test]
async fn rule_15_wrong_shape_is_not_found() {
    let server = MockThemeServer::new();
    let handle = server.start();
    let client = server.client();

    // A quantity where an arena reference is expected.
    server.queue_response(ServerResponse::Reply(Reply::Quantity(7)));
    assert!(client.effect_lookup("dialog_appear.fxml").await.is_none());

    server.queue_response(ServerResponse::Raw(vec![0xff; 3]));
    assert_eq!(client.free_shared_memory().await, None);

    assert_eq!(client.free_shared_memory().await, Some(0));
    assert_eq!(client.state(), ConnectionState::Connected);
    handle.abort();
}

/// Rule 16: A multi-icon reply with the wrong length is discarded
#[tokio::test]
async fn rule_16_multi_icon_length_mismatch() {
    let server = MockThemeServer::new();
    let handle = server.start();
    let client = server.client();

    let request = MultiIconRequest {
        paths: vec!["qtg_mono_a".into(), "qtg_mono_b".into()],
        sizes: vec![SizeF::new(32.0, 32.0); 2],
        aspect: AspectRatioMode::Keep,
        mode: IconMode::Normal,
        mirrored: false,
        options: 0,
        color: None,
        render_mode: RenderingMode::Software,
    };
    let one = server.store_svg(b"<svg/>");
    server.queue_response(ServerResponse::Reply(Reply::IconList(vec![one])));

    let list = client.multi_icon_lookup(&request).await;
    assert_eq!(list, vec![SharedIconInfo::Invalid; 2]);
    handle.abort();
}
