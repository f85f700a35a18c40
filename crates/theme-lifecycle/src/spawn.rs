//! Spawning the server on demand.
//!
//! A client that cannot connect takes an exclusive `flock` on the spawn lock
//! file, checks again, and only then starts the server. The server prints
//! [`READY_LINE`] on stdout after its arena is initialised and its listener is
//! bound; the spawning client waits for that line instead of sleeping.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use theme_config_and_utils::{BASE_DIR_ENV, SERVER_NAME};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::LifecycleError;

/// Line the server writes to stdout once it accepts connections.
pub const READY_LINE: &str = "READY";

/// Argument that starts the service.
pub const START_ARG: &str = "-start";

const LOCK_POLL: Duration = Duration::from_millis(20);

/// Exclusive advisory lock on the spawn lock file, released on drop.
pub struct SpawnLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl SpawnLock {
    /// Take the lock, waiting at most `timeout`.
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<Self, LifecycleError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(lock) = try_flock(path)? {
                debug!(path = %path.display(), "Acquired spawn lock");
                return Ok(Self {
                    _lock: lock,
                    path: path.to_path_buf(),
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LifecycleError::Timeout("spawn lock".to_string()));
            }
            tokio::time::sleep(LOCK_POLL).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Non-blocking exclusive `flock`. `None` when another open file holds it.
pub(crate) fn try_flock(path: &Path) -> Result<Option<Flock<File>>, LifecycleError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;

    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(lock) => Ok(Some(lock)),
        Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
        Err((_, errno)) => Err(LifecycleError::Lock(format!(
            "flock {}: {}",
            path.display(),
            errno
        ))),
    }
}

fn is_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Find the server executable.
///
/// Search order: the current working directory, the configured install `bin`
/// directory, then every `PATH` entry.
pub fn locate_server_binary(install_bin_dir: Option<&Path>) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH");
    let cwd = std::env::current_dir().ok();
    locate_in(
        cwd.as_deref(),
        install_bin_dir,
        path_var.iter().flat_map(std::env::split_paths),
    )
}

fn locate_in<I>(cwd: Option<&Path>, install_bin_dir: Option<&Path>, path_dirs: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    let fixed = cwd
        .into_iter()
        .chain(install_bin_dir)
        .map(Path::to_path_buf);

    fixed
        .chain(path_dirs)
        .map(|dir| dir.join(SERVER_NAME))
        .find(|candidate| is_executable(candidate))
}

/// Start the server in its own process group with stdout piped.
///
/// The child inherits `base_dir` through the environment so both sides agree
/// on the socket and arena locations.
pub fn spawn_server(binary: &Path, base_dir: &Path) -> Result<Child, LifecycleError> {
    info!(binary = %binary.display(), "Spawning theme server");

    let child = Command::new(binary)
        .arg(START_ARG)
        .env(BASE_DIR_ENV, base_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()?;

    Ok(child)
}

/// Wait for the server's readiness line.
pub async fn wait_for_ready(stdout: ChildStdout, timeout: Duration) -> Result<(), LifecycleError> {
    let mut lines = BufReader::new(stdout).lines();

    let wait = async {
        while let Some(line) = lines.next_line().await? {
            if line.trim() == READY_LINE {
                return Ok(());
            }
            debug!(line = %line, "Ignoring server stdout");
        }
        Err(LifecycleError::ExitedBeforeReady)
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => {
            warn!(?timeout, "Server did not signal readiness");
            Err(LifecycleError::Timeout("server readiness".to_string()))
        }
    }
}

/// Print the readiness line. Call once, after the listener is bound.
pub fn announce_ready() -> std::io::Result<()> {
    use std::io::Write;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", READY_LINE)?;
    out.flush()
}
