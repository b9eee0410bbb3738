//! Line-oriented connection over any async byte stream.
//!
//! Requests arrive as newline-terminated lines bounded by a maximum length;
//! responses go out as one JSON object per line.

use std::io;

use protocol::{LineDecoder, ProtocolError, Response, LINE_TERMINATOR};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Buffer size for socket reads.
const READ_BUFFER_SIZE: usize = 4096;

/// Errors that end or interrupt a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The transport failed or the peer went away mid-exchange.
    #[error("connection lost: {0}")]
    ConnectionLost(#[from] io::Error),

    /// A line could not be framed or a response could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// A framed connection to one peer.
pub struct Connection<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    decoder: LineDecoder,
    buffer: Vec<u8>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Wrap a stream, accepting lines up to `max_line_length` bytes.
    pub fn new(stream: S, max_line_length: usize) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: read_half,
            writer: write_half,
            decoder: LineDecoder::with_max_line_length(max_line_length),
            buffer: vec![0; READ_BUFFER_SIZE],
        }
    }

    /// Read the next line.
    ///
    /// Returns `None` once the peer has closed its side. An oversized line
    /// is reported once as [`SessionError::Protocol`]; the rest of it is
    /// skipped and the next call resumes at the following line.
    ///
    /// Cancel-safe: dropping the future never loses received bytes.
    pub async fn read_line(&mut self) -> Result<Option<String>, SessionError> {
        loop {
            if let Some(line) = self.decoder.next_line()? {
                return Ok(Some(line));
            }

            let n = self.reader.read(&mut self.buffer).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.push(&self.buffer[..n]);
        }
    }

    /// Write one raw line. The terminator is appended here.
    pub async fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(LINE_TERMINATOR);
        self.send_frame(&bytes).await
    }

    /// Write an already terminated frame.
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<(), SessionError> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send a response as a single JSON line.
    pub async fn send_response(&mut self, response: &Response) -> Result<(), SessionError> {
        let json = response.to_json()?;
        self.send_line(&json).await
    }

    /// Shut down the write side.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::Status;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_read_lines_split_across_writes() {
        let (client, server) = duplex(64);
        let mut conn = Connection::new(server, 1024);
        let (_, mut tx) = tokio::io::split(client);

        tx.write_all(b"create f1 ").await.unwrap();
        tx.write_all(b"rwrnnn\r\nread f1\n").await.unwrap();

        assert_eq!(conn.read_line().await.unwrap().unwrap(), "create f1 rwrnnn");
        assert_eq!(conn.read_line().await.unwrap().unwrap(), "read f1");
    }

    #[tokio::test]
    async fn test_read_returns_none_on_disconnect() {
        let (client, server) = duplex(64);
        let mut conn = Connection::new(server, 1024);
        drop(client);

        assert!(conn.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_line_reported_then_skipped() {
        let (client, server) = duplex(4096);
        let mut conn = Connection::new(server, 16);
        let (_, mut tx) = tokio::io::split(client);

        let long = "x".repeat(100);
        tx.write_all(format!("{}\nread f1\n", long).as_bytes())
            .await
            .unwrap();

        let err = conn.read_line().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Protocol(ProtocolError::LineTooLong { .. })
        ));
        assert_eq!(conn.read_line().await.unwrap().unwrap(), "read f1");
    }

    #[tokio::test]
    async fn test_send_response_is_one_json_line() {
        let (client, server) = duplex(1024);
        let mut conn = Connection::new(server, 1024);
        let (mut rx, _) = tokio::io::split(client);

        conn.send_response(&Response::ok("line one\nline two"))
            .await
            .unwrap();

        let mut buf = vec![0u8; 1024];
        let n = rx.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();

        assert_eq!(text.matches('\n').count(), 1);
        assert!(text.ends_with('\n'));
        let parsed = Response::from_json(text).unwrap();
        assert_eq!(parsed.status, Status::Ok);
        assert_eq!(parsed.message, "line one\nline two");
    }
}
