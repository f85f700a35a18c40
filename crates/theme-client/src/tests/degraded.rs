//! III. Bootstrap failure & reconnect.
//!
//! Rules covered:
//! - 9. With no server, lookups return Invalid without blocking
//! - 10. After a failed bootstrap the client does not retry on its own
//! - 11. A dropped connection gets one fresh bootstrap
//! - 12. Every operation degrades to its empty answer

use super::harness::{icon_key, MockThemeServer, ServerResponse};
use crate::ConnectionState;
use std::time::{Duration, Instant};
use theme_ipc::{
    AspectRatioMode, DiagReply, DiagRequest, IconMode, LayerPriority, MultiIconRequest,
    RenderingMode, SizeF,
};

/// Rule 9: With no server, lookups return Invalid without blocking
#[tokio::test]
async fn rule_09_no_server_returns_invalid() {
    let server = MockThemeServer::new();
    let client = server.client();

    let started = Instant::now();
    let info = client.icon_lookup(&icon_key("qtg_large_info")).await;
    assert!(!info.is_valid());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(started.elapsed() < Duration::from_secs(2));
}

/// Rule 10: After a failed bootstrap the client does not retry on its own
#[tokio::test]
async fn rule_10_failed_bootstrap_fails_fast() {
    let server = MockThemeServer::new();
    let client = server.client();
    client.free_shared_memory().await;

    let handle = server.start();
    let started = Instant::now();
    assert_eq!(client.free_shared_memory().await, None);
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(server.connection_count(), 0);

    assert!(client.reconnect().await);
    assert_eq!(client.free_shared_memory().await, Some(0));
    assert_eq!(client.state(), ConnectionState::Connected);
    handle.abort();
}

/// Rule 11: A dropped connection gets one fresh bootstrap
#[tokio::test]
async fn rule_11_dropped_connection_reconnects() {
    let server = MockThemeServer::new();
    let handle = server.start();
    let client = server.client();

    server.queue_response(ServerResponse::CloseConnection);
    assert!(!client.icon_lookup(&icon_key("qtg_large_info")).await.is_valid());

    assert_eq!(client.allocated_shared_memory().await, Some(0));
    assert_eq!(server.connection_count(), 2);
    assert_eq!(client.state(), ConnectionState::Connected);
    handle.abort();
}

/// Rule 12: Every operation degrades to its empty answer
#[tokio::test]
async fn rule_12_all_operations_degrade() {
    let server = MockThemeServer::new();
    let client = server.client();

    let multi = MultiIconRequest {
        paths: vec!["a".into(), "b".into(), "c".into()],
        sizes: vec![SizeF::new(16.0, 16.0); 3],
        aspect: AspectRatioMode::Keep,
        mode: IconMode::Normal,
        mirrored: false,
        options: 0,
        color: None,
        render_mode: RenderingMode::Software,
    };
    let list = client.multi_icon_lookup(&multi).await;
    assert_eq!(list.len(), 3);
    assert!(list.iter().all(|info| !info.is_valid()));

    assert!(client
        .style_sheet_lookup("hbpushbutton.css", LayerPriority::Core)
        .await
        .is_none());
    assert!(client.widget_layout_lookup("hbdialog.widgetml", "default", "").await.is_none());
    assert!(client.device_profile_lookup().await.is_none());
    assert!(client.typeface_table_lookup().await.is_none());
    assert!(client.effect_lookup("dialog_appear.fxml").await.is_none());
    assert!(!client.effect_add("dialog_appear.fxml").await);
    assert!(!client.unload_icon(&icon_key("a").id).await);
    assert!(!client.select_theme("sfblacktheme").await);
    assert!(!client.content_update(&[]).await);
    assert!(!client.switch_rendering_mode(RenderingMode::Hardware).await);
    assert!(!client.server_stop().await);
    assert_eq!(client.allocated_heap_memory().await, None);
    assert_eq!(
        client.diagnostics(DiagRequest::CacheIconCount).await,
        DiagReply::Unsupported
    );
    client.foreground_lost().await;
    assert!(client.resource_bytes(&theme_ipc::ArenaRef::new(64, 4, 1)).is_err());
}
