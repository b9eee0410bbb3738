//! Programmatic client for the file server.
//!
//! Connects, logs in, and runs one command per round trip. `waiting`
//! notices are skipped so every call returns the command's final response.

use std::io;
use std::time::Duration;

use protocol::{Command, LineCodec, Login, ProtocolError, Response, Status};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::session::{Connection, SessionError};

/// Longest response line the client accepts. Read results can be large.
const MAX_RESPONSE_LENGTH: usize = 1024 * 1024;

/// Errors from the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A request could not be framed or a response could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server closed the connection.
    #[error("server closed the connection")]
    Closed,

    /// No response within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The server refused the login.
    #[error("login rejected: {0}")]
    LoginRejected(String),
}

impl From<SessionError> for ClientError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::ConnectionLost(e) => ClientError::Io(e),
            SessionError::Protocol(e) => ClientError::Protocol(e),
        }
    }
}

/// A connection to the file server.
pub struct FileClient {
    connection: Connection<TcpStream>,
    codec: LineCodec,
    timeout: Option<Duration>,
    notices: usize,
    /// Set when a call timed out with its response still unread. Later
    /// replies could no longer be paired with their requests.
    desynced: bool,
}

impl FileClient {
    /// Connect to a server.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        Ok(Self {
            connection: Connection::new(stream, MAX_RESPONSE_LENGTH),
            codec: LineCodec::new(),
            timeout: None,
            notices: 0,
            desynced: false,
        })
    }

    /// Connect with a bound on the connect itself and on every later call.
    pub async fn connect_with_timeout(
        addr: impl ToSocketAddrs,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let mut client = tokio::time::timeout(timeout, Self::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout)??;
        client.timeout = Some(timeout);
        Ok(client)
    }

    /// Set or clear the per-call timeout. Without one a call waits as long
    /// as the server holds the request.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Number of `waiting` notices received so far.
    pub fn notices_received(&self) -> usize {
        self.notices
    }

    /// Log in as `user` in `group`.
    pub async fn login(&mut self, user: &str, group: &str) -> Result<Response, ClientError> {
        let login = Login::new(user, group);
        let response = self.send_line(&login.to_string()).await?;
        if response.status == Status::LoginRejected {
            return Err(ClientError::LoginRejected(response.message));
        }
        Ok(response)
    }

    /// Send a command.
    pub async fn send(&mut self, command: &Command) -> Result<Response, ClientError> {
        self.send_line(&command.to_string()).await
    }

    /// Send a raw request line and wait for its final response.
    ///
    /// After a timeout the connection is unusable and every later call
    /// fails with [`ClientError::Closed`].
    pub async fn send_line(&mut self, line: &str) -> Result<Response, ClientError> {
        if self.desynced {
            return Err(ClientError::Closed);
        }
        match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.round_trip(line)).await {
                Ok(result) => result,
                Err(_) => {
                    self.desynced = true;
                    Err(ClientError::Timeout)
                }
            },
            None => self.round_trip(line).await,
        }
    }

    async fn round_trip(&mut self, line: &str) -> Result<Response, ClientError> {
        let frame = self.codec.encode(line)?;
        self.connection.send_frame(&frame).await?;

        loop {
            let reply = self
                .connection
                .read_line()
                .await?
                .ok_or(ClientError::Closed)?;
            let response = Response::from_json(&reply)?;

            if response.status.is_interim() {
                debug!(message = %response.message, "Server notice");
                self.notices += 1;
                continue;
            }
            return Ok(response);
        }
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.connection.shutdown().await?;
        Ok(())
    }
}
