//! Per-connection session handler.
//!
//! A session moves through `Authenticating → Ready → Closed`. The first
//! line is the login `"<user> <group>"`; after a successful login every
//! line is one command and gets exactly one final response.

use std::fmt;
use std::sync::Arc;

use protocol::{Login, Response, Status};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::connection::{Connection, SessionError};
use crate::config::AccessConfig;
use crate::dispatcher::CommandDispatcher;
use crate::files::Identity;

/// Unique identifier for a session.
pub type SessionId = Uuid;

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the login line.
    Authenticating,
    /// Logged in; processing commands.
    Ready,
    /// Finished.
    Closed,
}

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the connection.
    PeerClosed,
    /// Login was refused.
    LoginRejected,
    /// The server is shutting down.
    Shutdown,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::PeerClosed => write!(f, "peer closed connection"),
            SessionEnd::LoginRejected => write!(f, "login rejected"),
            SessionEnd::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// One client's session. Exclusively owned by the task serving it.
pub struct ClientSession<S> {
    id: SessionId,
    connection: Connection<S>,
    state: SessionState,
    identity: Option<Identity>,
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Start a session over an accepted stream.
    pub fn new(id: SessionId, stream: S, max_line_length: usize) -> Self {
        Self {
            id,
            connection: Connection::new(stream, max_line_length),
            state: SessionState::Authenticating,
            identity: None,
        }
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Authenticated identity, once logged in.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }
}

/// Serves sessions against a shared dispatcher.
///
/// One handler is built by the server and shared by every connection task.
#[derive(Debug)]
pub struct SessionHandler {
    dispatcher: Arc<CommandDispatcher>,
    access: AccessConfig,
    max_line_length: usize,
    shutdown: CancellationToken,
}

impl SessionHandler {
    /// Create a handler. Sessions stop when `shutdown` is cancelled.
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        access: AccessConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            access,
            max_line_length: protocol::MAX_LINE_LENGTH,
            shutdown,
        }
    }

    /// Override the request line limit.
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Run a session to completion over `stream`.
    pub async fn run<S>(&self, id: SessionId, stream: S) -> Result<SessionEnd, SessionError>
    where
        S: AsyncRead + AsyncWrite,
    {
        let mut session = ClientSession::new(id, stream, self.max_line_length);
        let span = info_span!("session", session_id = %id);

        let result = self.serve(&mut session).instrument(span.clone()).await;
        session.state = SessionState::Closed;

        span.in_scope(|| match &result {
            Ok(end) => info!(reason = %end, "Session closed"),
            Err(e) => warn!(error = %e, "Session closed with error"),
        });
        result
    }

    async fn serve<S>(&self, session: &mut ClientSession<S>) -> Result<SessionEnd, SessionError>
    where
        S: AsyncRead + AsyncWrite,
    {
        debug!("Awaiting login");
        let identity = match self.authenticate(session).await? {
            Ok(identity) => identity,
            Err(end) => return Ok(end),
        };

        info!(user = %identity.user, group = %identity.group, "Login accepted");
        session.identity = Some(identity.clone());
        session.state = SessionState::Ready;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
                next = session.connection.read_line() => next,
            };

            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(SessionEnd::PeerClosed),
                Err(SessionError::Protocol(e)) => {
                    debug!(error = %e, "Rejected request line");
                    session.connection.send_response(&Response::from(e)).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !self.process(session, &identity, &line).await? {
                return Ok(SessionEnd::Shutdown);
            }
        }
    }

    /// Read and check the login line.
    ///
    /// The inner `Err` carries the reason the session ends without a login.
    async fn authenticate<S>(
        &self,
        session: &mut ClientSession<S>,
    ) -> Result<Result<Identity, SessionEnd>, SessionError>
    where
        S: AsyncRead + AsyncWrite,
    {
        let next = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(Err(SessionEnd::Shutdown)),
            next = session.connection.read_line() => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(Err(SessionEnd::PeerClosed)),
            Err(SessionError::Protocol(e)) => {
                warn!(error = %e, "Login line rejected");
                self.reject(session, e.to_string()).await?;
                return Ok(Err(SessionEnd::LoginRejected));
            }
            Err(e) => return Err(e),
        };

        let login = match Login::parse(&line) {
            Ok(login) => login,
            Err(e) => {
                warn!(error = %e, "Malformed login");
                self.reject(session, e.to_string()).await?;
                return Ok(Err(SessionEnd::LoginRejected));
            }
        };

        if !self.access.is_group_allowed(&login.group) {
            warn!(user = %login.user, group = %login.group, "Group not allowed");
            self.reject(session, format!("group {} is not allowed", login.group))
                .await?;
            return Ok(Err(SessionEnd::LoginRejected));
        }

        session
            .connection
            .send_response(&Response::login_ok(&login))
            .await?;
        Ok(Ok(Identity::from(login)))
    }

    async fn reject<S>(
        &self,
        session: &mut ClientSession<S>,
        message: String,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite,
    {
        session
            .connection
            .send_response(&Response::new(Status::LoginRejected, message))
            .await?;
        session.connection.shutdown().await
    }

    /// Dispatch one command and write its response.
    ///
    /// Interim notices raised while the command waits on a lock are written
    /// as they arrive, always before the final response. Returns `false` if
    /// shutdown interrupted the command; the in-flight operation is dropped
    /// and releases any entry lock it held.
    async fn process<S>(
        &self,
        session: &mut ClientSession<S>,
        identity: &Identity,
        line: &str,
    ) -> Result<bool, SessionError>
    where
        S: AsyncRead + AsyncWrite,
    {
        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
        let dispatch = self.dispatcher.dispatch_line(identity, line, Some(&notice_tx));
        tokio::pin!(dispatch);

        let response = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(false),
                response = &mut dispatch => break response,
                Some(notice) = notice_rx.recv() => {
                    session.connection.send_response(&notice).await?;
                }
            }
        };

        while let Ok(notice) = notice_rx.try_recv() {
            session.connection.send_response(&notice).await?;
        }

        debug!(status = %response.status, "Sending response");
        session.connection.send_response(&response).await?;
        Ok(true)
    }
}
