//! End-to-end tests: an in-process server on a real socket and arena, driven
//! through `ThemeClient`.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use theme_client::{ClientError, ClientOptions, ThemeClient, ThemeEvent};
use theme_config_and_utils::{Config, Paths};
use theme_ipc::{DiagReply, DiagRequest, IconFormat, IconId, IconKey, IpcServer, LayerPriority, SizeF};
use theme_server::{ServerState, ThemeDispatcher};
use tokio::task::JoinHandle;

struct TestServer {
    _base: TempDir,
    _themes: TempDir,
    paths: Paths,
    config: Config,
    dispatcher: Arc<ThemeDispatcher>,
    shutdown: tokio::sync::broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let base = TempDir::new().unwrap();
        let themes = TempDir::new().unwrap();
        write_themes(themes.path());

        let paths = Paths::with_base_dir(base.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        let config = Config {
            arena_name: format!("ts_{}", &uuid::Uuid::new_v4().simple().to_string()[..16]),
            arena_size: 1024 * 1024,
            themes_dir: Some(themes.path().to_path_buf()),
            diagnostics: true,
            ..Config::default()
        };
        Self::launch(base, themes, paths, config)
    }

    fn launch(base: TempDir, themes: TempDir, paths: Paths, config: Config) -> Self {
        let state = ServerState::open(&config, &paths).unwrap();
        let dispatcher = Arc::new(ThemeDispatcher::new(state));
        let server = IpcServer::new(paths.socket_file(), dispatcher.clone()).with_diagnostics(true);
        let listener = server.bind().unwrap();
        let shutdown = server.shutdown_sender();
        let task = tokio::spawn(async move {
            server.serve(listener).await.unwrap();
        });

        Self {
            _base: base,
            _themes: themes,
            paths,
            config,
            dispatcher,
            shutdown,
            task,
        }
    }

    fn client(&self) -> ThemeClient {
        let mut options = ClientOptions::new(self.paths.clone(), self.config.clone());
        options.spawn_server = false;
        ThemeClient::new(options)
    }

    /// Stop this instance and start a fresh one on the same directories and
    /// arena name, as a respawn after a crash would.
    async fn restart(self) -> Self {
        let Self {
            _base: base,
            _themes: themes,
            paths,
            config,
            dispatcher,
            shutdown,
            task,
        } = self;
        let _ = shutdown.send(());
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
        drop(dispatcher);
        Self::launch(base, themes, paths, config)
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = tokio::time::timeout(Duration::from_secs(2), self.task).await;
    }
}

fn write_themes(root: &Path) {
    for (rel, data) in [
        ("icons/hbdefault/qtg_large_info.svg", &b"<svg id='default'/>"[..]),
        ("icons/sfblacktheme/qtg_large_info.svg", &b"<svg id='black'/>"[..]),
        ("style/hbdefault/hbpushbutton.css", &b"HbPushButton { }"[..]),
        ("effects/hbdefault/dialog_appear.fxml", &b"<effect/>"[..]),
    ] {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }
}

fn info_key() -> IconKey {
    IconKey::new(IconId::new("qtg_large_info", SizeF::new(32.0, 32.0)))
}

async fn wait_for_event(client: &ThemeClient) -> Vec<ThemeEvent> {
    for _ in 0..50 {
        let events = client.poll_events();
        if !events.is_empty() {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Vec::new()
}

async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..50 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_lookup_served_from_shared_arena() {
    let server = TestServer::start().await;
    let client = server.client();

    let info = client.icon_lookup(&info_key()).await;
    assert_eq!(info.format(), IconFormat::Svg);
    let bytes = client.resource_bytes(&info.handle().unwrap()).unwrap();
    assert_eq!(bytes, b"<svg id='default'/>");

    let css = client
        .style_sheet_lookup("hbpushbutton.css", LayerPriority::Theme)
        .await
        .unwrap();
    assert_eq!(client.resource_bytes(&css).unwrap(), b"HbPushButton { }");
    assert!(client.effect_add("dialog_appear.fxml").await);
    assert!(client.device_profile_lookup().await.is_none());

    assert!(client.unload_icon(&info_key().id).await);
    assert_eq!(
        client.diagnostics(DiagRequest::CacheIconCount).await,
        DiagReply::Count(0)
    );
    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_releases_session_references() {
    let server = TestServer::start().await;
    let client = server.client();

    assert!(client.icon_lookup(&info_key()).await.is_valid());
    assert!(client.icon_lookup(&info_key()).await.is_valid());
    assert_eq!(server.dispatcher.with_state(|s| s.cached_icons()), 1);

    client.disconnect();
    let released = wait_until(|| server.dispatcher.with_state(|s| s.cached_icons()) == 0).await;
    assert!(released, "references held by a closed session were not released");
    server.stop().await;
}

#[tokio::test]
async fn test_theme_change_notifies_and_invalidates_handles() {
    let server = TestServer::start().await;
    let selector = server.client();
    let watcher = server.client();

    let old = watcher.icon_lookup(&info_key()).await.handle().unwrap();
    assert!(selector.select_theme("sfblacktheme").await);

    let events = wait_for_event(&watcher).await;
    assert_eq!(events, vec![ThemeEvent::ThemeChanged("sfblacktheme".into())]);
    assert_eq!(watcher.current_theme(), "sfblacktheme");
    assert!(selector.poll_events().is_empty());

    match watcher.resource_bytes(&old) {
        Err(ClientError::StaleHandle { handle, current }) => {
            assert_eq!(handle, old.generation);
            assert_eq!(current, old.generation + 1);
        }
        other => panic!("expected stale handle, got {:?}", other),
    }

    let fresh = watcher.icon_lookup(&info_key()).await;
    assert_eq!(
        watcher.resource_bytes(&fresh.handle().unwrap()).unwrap(),
        b"<svg id='black'/>"
    );
    let settings = std::fs::read_to_string(server.paths.settings_file()).unwrap();
    assert!(settings.contains("sfblacktheme"));
    server.stop().await;
}

#[tokio::test]
async fn test_stop_refused_with_two_clients() {
    let server = TestServer::start().await;
    let first = server.client();
    let second = server.client();
    assert!(first.reconnect().await);
    assert!(second.reconnect().await);

    assert!(!first.server_stop().await);

    second.disconnect();
    let stop = server.dispatcher.stop_signal();
    let mut accepted = false;
    for _ in 0..50 {
        if first.server_stop().await {
            accepted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(accepted, "stop refused for the sole client");
    tokio::time::timeout(Duration::from_secs(2), stop.notified())
        .await
        .expect("stop signalled");
    server.stop().await;
}

#[tokio::test]
async fn test_handles_from_previous_server_are_stale() {
    let server = TestServer::start().await;
    let client = server.client();
    let old = client.icon_lookup(&info_key()).await.handle().unwrap();

    let server = server.restart().await;
    assert!(client.reconnect().await);
    let fresh = client.icon_lookup(&info_key()).await.handle().unwrap();
    assert!(fresh.generation > old.generation);

    match client.resource_bytes(&old) {
        Err(ClientError::StaleHandle { handle, current }) => {
            assert_eq!(handle, old.generation);
            assert_eq!(current, fresh.generation);
        }
        other => panic!("handle from the previous server resolved: {:?}", other),
    }
    assert_eq!(
        client.resource_bytes(&fresh).unwrap(),
        b"<svg id='default'/>"
    );
    server.stop().await;
}
