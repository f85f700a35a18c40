//! Tests that run the `hbthemeserver` executable.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use theme_client::{ClientOptions, ThemeClient};
use theme_config_and_utils::{Config, Paths, BASE_DIR_ENV};
use theme_ipc::{IconId, IconKey, SizeF};
use theme_lifecycle::{read_pid_file, wait_for_ready, START_ARG};
use tokio::process::{Child, Command};

const SERVER_BIN: &str = env!("CARGO_BIN_EXE_hbthemeserver");

struct Fixture {
    base: TempDir,
    _themes: TempDir,
    paths: Paths,
    config: Config,
}

impl Fixture {
    fn new() -> Self {
        let base = TempDir::new().unwrap();
        let themes = TempDir::new().unwrap();
        let icon = themes.path().join("icons/hbdefault/qtg_small_star.svg");
        std::fs::create_dir_all(icon.parent().unwrap()).unwrap();
        std::fs::write(&icon, b"<svg/>").unwrap();

        let paths = Paths::with_base_dir(base.path().to_path_buf());
        let config = Config {
            arena_name: format!("ts_{}", &uuid::Uuid::new_v4().simple().to_string()[..16]),
            arena_size: 1024 * 1024,
            themes_dir: Some(themes.path().to_path_buf()),
            install_bin_dir: Path::new(SERVER_BIN).parent().map(Path::to_path_buf),
            ..Config::default()
        };
        config.save(&paths).unwrap();

        Self {
            base,
            _themes: themes,
            paths,
            config,
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(SERVER_BIN);
        cmd.args(args)
            .env(BASE_DIR_ENV, self.base.path())
            .env_remove("HB_THEMES_DIR")
            .stdin(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    async fn spawn_ready(&self) -> Child {
        let mut child = self
            .command(&[START_ARG])
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        wait_for_ready(stdout, Duration::from_secs(10)).await.unwrap();
        child
    }

    async fn run(&self, args: &[&str]) -> (Option<i32>, String) {
        let output = self
            .command(args)
            .stdout(Stdio::piped())
            .output()
            .await
            .unwrap();
        (
            output.status.code(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
        )
    }

    fn socket(&self) -> PathBuf {
        self.paths.socket_file()
    }
}

/// PIDs of live server processes started for `base`.
#[cfg(target_os = "linux")]
fn server_pids(base: &Path) -> Vec<u32> {
    let needle = format!("{}={}", BASE_DIR_ENV, base.display());
    let mut pids: Vec<u32> = std::fs::read_dir("/proc")
        .unwrap()
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| {
            let cmdline = std::fs::read(format!("/proc/{}/cmdline", pid)).unwrap_or_default();
            let environ = std::fs::read(format!("/proc/{}/environ", pid)).unwrap_or_default();
            cmdline
                .split(|b| *b == 0)
                .any(|arg| arg == START_ARG.as_bytes())
                && environ
                    .split(|b| *b == 0)
                    .any(|var| var == needle.as_bytes())
        })
        .collect();
    pids.sort_unstable();
    pids
}

async fn wait_for_socket_removal(fixture: &Fixture) -> bool {
    for _ in 0..50 {
        if !fixture.socket().exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn wait_for_exit(child: &mut Child) -> bool {
    tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .is_ok()
}

#[tokio::test]
async fn test_ready_status_and_stop() {
    let fixture = Fixture::new();
    let mut server = fixture.spawn_ready().await;
    assert!(fixture.socket().exists());
    assert!(fixture.paths.pid_file().exists());

    let (code, out) = fixture.run(&["status"]).await;
    assert_eq!(code, Some(0));
    assert!(out.contains("Theme server is running"), "{}", out);
    assert!(out.contains("hbdefault"), "{}", out);

    let (code, out) = fixture.run(&["stop"]).await;
    assert_eq!(code, Some(0));
    assert!(out.contains("Theme server stopped"), "{}", out);

    assert!(wait_for_exit(&mut server).await);
    assert!(!fixture.socket().exists());
    assert!(!fixture.paths.pid_file().exists());
}

#[tokio::test]
async fn test_second_instance_exits() {
    let fixture = Fixture::new();
    let mut server = fixture.spawn_ready().await;

    let (code, out) = fixture.run(&[START_ARG]).await;
    assert_eq!(code, Some(1));
    assert!(!out.contains("READY"));

    // The first instance keeps serving.
    let (_, status) = fixture.run(&["status"]).await;
    assert!(status.contains("Theme server is running"), "{}", status);

    fixture.run(&["stop"]).await;
    assert!(wait_for_exit(&mut server).await);
}

#[tokio::test]
async fn test_status_without_server() {
    let fixture = Fixture::new();
    let (code, out) = fixture.run(&["status"]).await;
    assert_eq!(code, Some(0));
    assert!(out.contains("not running"), "{}", out);
}

#[tokio::test]
async fn test_client_spawns_server_on_demand() {
    let fixture = Fixture::new();
    let client = ThemeClient::new(ClientOptions::new(
        fixture.paths.clone(),
        fixture.config.clone(),
    ));

    let key = IconKey::new(IconId::new("qtg_small_star", SizeF::new(16.0, 16.0)));
    let info = client.icon_lookup(&key).await;
    assert!(info.is_valid());
    assert_eq!(client.resource_bytes(&info.handle().unwrap()).unwrap(), b"<svg/>");
    assert!(fixture.socket().exists());

    assert!(client.server_stop().await);
    client.disconnect();
    assert!(wait_for_socket_removal(&fixture).await);
}

#[tokio::test]
async fn test_concurrent_starts_leave_one_server() {
    let fixture = Fixture::new();
    let start = || {
        fixture
            .command(&[START_ARG])
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    };
    let mut first = start();
    let mut second = start();

    let (a, b) = tokio::join!(
        wait_for_ready(first.stdout.take().unwrap(), Duration::from_secs(10)),
        wait_for_ready(second.stdout.take().unwrap(), Duration::from_secs(10)),
    );
    assert!(a.is_ok() != b.is_ok(), "first: {:?}, second: {:?}", a, b);
    let (winner, loser) = if a.is_ok() {
        (&mut first, &mut second)
    } else {
        (&mut second, &mut first)
    };

    let status = tokio::time::timeout(Duration::from_secs(5), loser.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.code(), Some(1));

    let (_, out) = fixture.run(&["status"]).await;
    assert!(out.contains("Theme server is running"), "{}", out);
    assert_eq!(
        read_pid_file(&fixture.paths.pid_file()).unwrap(),
        winner.id()
    );

    fixture.run(&["stop"]).await;
    assert!(wait_for_exit(winner).await);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_racing_clients_spawn_one_server() {
    let fixture = Fixture::new();
    let client = || ThemeClient::new(ClientOptions::new(fixture.paths.clone(), fixture.config.clone()));
    let (left, right) = (client(), client());
    let key = IconKey::new(IconId::new("qtg_small_star", SizeF::new(16.0, 16.0)));

    let (left_info, right_info) = tokio::join!(left.icon_lookup(&key), right.icon_lookup(&key));
    assert!(left_info.is_valid());
    assert!(right_info.is_valid());
    assert_eq!(left_info.handle(), right_info.handle());

    let pid = read_pid_file(&fixture.paths.pid_file()).unwrap().unwrap();
    assert_eq!(server_pids(fixture.base.path()), vec![pid]);

    left.disconnect();
    right.disconnect();
    let (code, _) = fixture.run(&["stop"]).await;
    assert_eq!(code, Some(0));
    assert!(wait_for_socket_removal(&fixture).await);
}
