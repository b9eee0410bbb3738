//! TCP server wiring the registry, dispatcher and sessions together.
//!
//! `FileServer` owns the shared registry, binds the listener, and runs one
//! supervised task per accepted connection. All tasks observe a single
//! cancellation token so `stop` can end them and wait for them to finish.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::dispatcher::CommandDispatcher;
use crate::files::{FileRegistry, FileStorage};
use crate::session::{SessionHandler, SessionId};

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not started, or fully stopped.
    Stopped,
    /// Binding the listener.
    Starting,
    /// Accepting connections.
    Running,
    /// Cancelling sessions and waiting for them to finish.
    ShuttingDown,
}

/// Events emitted by the server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Server state changed.
    StateChanged(ServerState),
    /// A connection was accepted.
    SessionOpened {
        session_id: SessionId,
        peer: SocketAddr,
    },
    /// A session finished.
    SessionClosed {
        session_id: SessionId,
        reason: String,
    },
    /// Accept failed.
    Error { message: String },
}

/// The file server.
pub struct FileServer {
    /// Configuration.
    config: Config,
    /// Capability list shared by all sessions.
    registry: Arc<FileRegistry>,
    /// Backing store.
    storage: Arc<FileStorage>,
    /// Handler shared by all connection tasks.
    handler: Arc<SessionHandler>,
    /// Current state.
    state: Arc<RwLock<ServerState>>,
    /// Address the listener is bound to, once started.
    local_addr: Option<SocketAddr>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Accept loop and session tasks.
    tracker: TaskTracker,
    /// Event sender.
    event_tx: broadcast::Sender<ServerEvent>,
}

impl FileServer {
    /// Build a server from a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let registry = Arc::new(FileRegistry::new(config.registry.capacity));
        let storage = Arc::new(FileStorage::new(&config.server.storage_dir));
        let dispatcher = CommandDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&storage),
            config.timing.clone(),
        )
        .with_contention_notice(config.session.contention_notice);

        let shutdown_token = CancellationToken::new();
        let handler = SessionHandler::new(
            Arc::new(dispatcher),
            config.access.clone(),
            shutdown_token.clone(),
        )
        .with_max_line_length(config.session.max_line_length);

        let (event_tx, _) = broadcast::channel(256);

        Ok(Self {
            config,
            registry,
            storage,
            handler: Arc::new(handler),
            state: Arc::new(RwLock::new(ServerState::Stopped)),
            local_addr: None,
            shutdown_token,
            tracker: TaskTracker::new(),
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Returns a receiver for server events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.event_tx.subscribe()
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 was requested. A server that has been stopped cannot be
    /// started again; build a new one instead.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        {
            let mut state = self.state.write().await;
            if *state != ServerState::Stopped {
                anyhow::bail!("Server is already running");
            }
            if self.shutdown_token.is_cancelled() {
                anyhow::bail!("Server has been shut down and cannot be restarted");
            }
            *state = ServerState::Starting;
        }
        self.emit_event(ServerEvent::StateChanged(ServerState::Starting));

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.write().await = ServerState::Stopped;
                self.emit_event(ServerEvent::StateChanged(ServerState::Stopped));
                return Err(e);
            }
        };
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;
        self.local_addr = Some(local_addr);

        let handler = Arc::clone(&self.handler);
        let shutdown_token = self.shutdown_token.clone();
        let tracker = self.tracker.clone();
        let event_tx = self.event_tx.clone();
        self.tracker.spawn(Self::accept_loop(
            listener,
            handler,
            shutdown_token,
            tracker,
            event_tx,
        ));

        *self.state.write().await = ServerState::Running;
        self.emit_event(ServerEvent::StateChanged(ServerState::Running));

        info!(
            addr = %local_addr,
            capacity = self.registry.capacity(),
            storage_dir = %self.storage.root().display(),
            "File server listening"
        );
        Ok(local_addr)
    }

    async fn bind(&self) -> Result<TcpListener> {
        self.storage
            .ensure_root()
            .await
            .context("Failed to prepare storage directory")?;

        let addr = self.config.socket_addr()?;
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .context("Failed to create socket")?;

        socket
            .set_reuseaddr(true)
            .context("Failed to set SO_REUSEADDR")?;
        socket
            .bind(addr)
            .with_context(|| format!("Failed to bind {}", addr))?;
        socket
            .listen(self.config.server.backlog)
            .with_context(|| format!("Failed to listen on {}", addr))
    }

    /// Accepts connections until shutdown, spawning one session task each.
    async fn accept_loop(
        listener: TcpListener,
        handler: Arc<SessionHandler>,
        shutdown_token: CancellationToken,
        tracker: TaskTracker,
        event_tx: broadcast::Sender<ServerEvent>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    debug!("Accept loop received shutdown signal");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
                            }

                            let session_id = Uuid::new_v4();
                            info!(%session_id, %peer, "Accepted connection");
                            let _ = event_tx.send(ServerEvent::SessionOpened { session_id, peer });

                            let handler = Arc::clone(&handler);
                            let event_tx = event_tx.clone();
                            tracker.spawn(async move {
                                let reason = match handler.run(session_id, stream).await {
                                    Ok(end) => end.to_string(),
                                    Err(e) => e.to_string(),
                                };
                                let _ = event_tx.send(ServerEvent::SessionClosed { session_id, reason });
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            let _ = event_tx.send(ServerEvent::Error { message: e.to_string() });
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }

    /// Stop accepting, end every session, and wait for their tasks.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == ServerState::Stopped {
                return Ok(());
            }
            if *state == ServerState::ShuttingDown {
                anyhow::bail!("Server is already shutting down");
            }
            *state = ServerState::ShuttingDown;
        }
        self.emit_event(ServerEvent::StateChanged(ServerState::ShuttingDown));

        info!("Stopping file server...");
        self.shutdown_token.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        {
            let mut state = self.state.write().await;
            *state = ServerState::Stopped;
        }
        self.emit_event(ServerEvent::StateChanged(ServerState::Stopped));

        if !self.registry.is_empty() {
            self.registry.log_capability_list();
        }
        info!(files = self.registry.len(), "File server stopped");
        Ok(())
    }

    /// Emits a server event.
    fn emit_event(&self, event: ServerEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the shared registry.
    pub fn registry(&self) -> &Arc<FileRegistry> {
        &self.registry
    }

    /// Returns the effective configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Number of tracked tasks (accept loop plus live sessions).
    pub fn task_count(&self) -> usize {
        self.tracker.len()
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}
