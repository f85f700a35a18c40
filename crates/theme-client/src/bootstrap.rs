//! Connection bootstrap: connect, or spawn the server and retry.
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                     |
//!                     +-> spawn lock -> re-check -> spawn -> READY -> retry
//!                     |
//!                     +-> Disconnected (attempts exhausted)
//! ```

use std::time::Duration;

use theme_arena::Arena;
use theme_config_and_utils::{Config, Paths};
use theme_ipc::{CoreOpcode, HandshakeInfo, ProtocolId, Reply, Request, PROTOCOL_VERSION};
use theme_lifecycle::{
    check_singleton, locate_server_binary, spawn_server, wait_for_ready, LifecycleError,
    SingletonCheck, SpawnLock,
};
use tracing::{debug, info, warn};

use crate::demux::Connection;
use crate::error::{ClientError, ClientResult};
use crate::events::EventQueue;
use crate::transport::{Transport, TransportKind};

/// Pause between attempts when spawning is disabled.
const RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// How many times bootstrap tries to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Byte-stream clients retry once.
    #[default]
    Stream,
    /// Session clients loop up to three attempts.
    Session,
}

impl RetryPolicy {
    pub fn attempts(self) -> u32 {
        match self {
            Self::Stream => 2,
            Self::Session => 3,
        }
    }
}

/// An established, handshaken connection with its arena mapping.
pub struct Session {
    pub transport: Box<dyn Transport>,
    pub arena: Arena,
    pub info: HandshakeInfo,
}

/// Connection bootstrap settings.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    paths: Paths,
    config: Config,
    policy: RetryPolicy,
    spawn: bool,
}

impl Bootstrap {
    pub fn new(paths: Paths, config: Config) -> Self {
        Self {
            paths,
            config,
            policy: RetryPolicy::default(),
            spawn: true,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Never start a server; only connect to a running one.
    pub fn without_spawn(mut self) -> Self {
        self.spawn = false;
        self
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connect (spawning the server if needed), handshake and map the arena.
    pub async fn establish(&self, kind: TransportKind, events: &EventQueue) -> ClientResult<Session> {
        let connection = self.connect(events).await?;
        let transport = kind.build(connection, &self.config);
        let info = handshake(transport.as_ref()).await?;
        let arena = Arena::open(&info.arena_name)?;
        info!(
            arena = %info.arena_name,
            generation = info.generation,
            theme = %info.theme,
            epoch = transport.epoch(),
            "Connected to theme server"
        );
        Ok(Session {
            transport,
            arena,
            info,
        })
    }

    async fn connect(&self, events: &EventQueue) -> ClientResult<Connection> {
        let socket_path = self.paths.socket_file();
        let attempts = self.policy.attempts();
        let mut last_error = ClientError::NotConnected;

        for attempt in 1..=attempts {
            match Connection::connect(&socket_path, self.config.connect_timeout(), events.clone())
                .await
            {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    debug!(attempt, attempts, error = %e, "Connect failed");
                    last_error = e;
                }
            }
            if attempt == attempts {
                break;
            }

            if self.spawn {
                if let Err(e) = self.start_server().await {
                    warn!(attempt, error = %e, "Could not start theme server");
                    last_error = e;
                }
            } else {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
        Err(last_error)
    }

    /// Start a server unless another process already has one up.
    async fn start_server(&self) -> ClientResult<()> {
        self.paths.ensure_dirs()?;
        let _lock = SpawnLock::acquire(&self.paths.spawn_lock_file(), self.config.start_timeout())
            .await?;

        // Whoever held the lock before us may have started it already.
        if check_singleton(&self.paths.socket_file()) == SingletonCheck::AlreadyRunning {
            debug!("Theme server came up while waiting for the spawn lock");
            return Ok(());
        }

        let binary = locate_server_binary(self.config.install_bin_dir.as_deref())
            .ok_or_else(|| ClientError::SpawnFailed(LifecycleError::BinaryNotFound.to_string()))?;
        info!(binary = %binary.display(), "Starting theme server");

        let mut child = spawn_server(&binary, self.paths.base_dir())
            .map_err(|e| ClientError::SpawnFailed(e.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::SpawnFailed("server stdout not captured".to_string()))?;

        match wait_for_ready(stdout, self.config.start_timeout()).await {
            Ok(()) => Ok(()),
            // Lost a race with a server started outside the lock.
            Err(LifecycleError::ExitedBeforeReady) => {
                debug!("Spawned server exited early, retrying connect");
                Ok(())
            }
            Err(e) => Err(ClientError::SpawnFailed(e.to_string())),
        }
    }
}

/// Exchange protocol versions; a mismatch fails closed.
pub async fn handshake(transport: &dyn Transport) -> ClientResult<HandshakeInfo> {
    let request = Request::Handshake {
        version: PROTOCOL_VERSION,
    };
    let frame = transport
        .call(
            ProtocolId::Core,
            CoreOpcode::Handshake.as_u16(),
            request.encode_body(),
        )
        .await?;

    let info = match Reply::from_frame(CoreOpcode::Handshake, &frame) {
        Ok(Reply::Handshake(info)) => info,
        Ok(other) => {
            return Err(ClientError::ProtocolMismatch(format!(
                "unexpected handshake reply {:?}",
                other
            )))
        }
        Err(e) => return Err(ClientError::ProtocolMismatch(e.to_string())),
    };

    if info.protocol_version != PROTOCOL_VERSION {
        return Err(ClientError::ProtocolMismatch(format!(
            "server speaks version {}, client {}",
            info.protocol_version, PROTOCOL_VERSION
        )));
    }
    Ok(info)
}
