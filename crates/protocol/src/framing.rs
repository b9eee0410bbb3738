//! Newline-delimited line framing.
//!
//! # Frame Format
//!
//! Every login, command and response is a single UTF-8 line terminated by
//! `\n`. A trailing `\r` before the terminator is stripped so that
//! `telnet`-style clients work unchanged.
//!
//! A single write on one side is not guaranteed to arrive as a single read
//! on the other, so [`LineDecoder`] buffers incoming bytes and yields only
//! complete lines.
//!
//! # Length Bounds
//!
//! Lines longer than [`MAX_LINE_LENGTH`] are rejected. The decoder reports
//! the oversized line once and then discards bytes up to the next
//! terminator, so a connection can recover and keep going.

use bytes::{Buf, BytesMut};

use crate::error::{ProtocolError, Result};

/// Line terminator byte.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Maximum line length in bytes, excluding the terminator.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Encoder for outgoing lines.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line_length: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Create a codec with the default length bound.
    pub fn new() -> Self {
        Self {
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    /// Create a codec with a custom length bound.
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self { max_line_length }
    }

    /// Maximum line length accepted by this codec.
    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Encode a line into bytes, appending the terminator.
    pub fn encode(&self, line: &str) -> Result<Vec<u8>> {
        if line.bytes().any(|b| b == LINE_TERMINATOR) {
            return Err(ProtocolError::EmbeddedNewline);
        }
        if line.len() > self.max_line_length {
            return Err(ProtocolError::LineTooLong {
                size: line.len(),
                max: self.max_line_length,
            });
        }

        let mut out = Vec::with_capacity(line.len() + 1);
        out.extend_from_slice(line.as_bytes());
        out.push(LINE_TERMINATOR);
        Ok(out)
    }

    /// Create a decoder sharing this codec's length bound.
    pub fn decoder(&self) -> LineDecoder {
        LineDecoder::with_max_line_length(self.max_line_length)
    }
}

/// Incremental decoder for incoming lines.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: BytesMut,
    max_line_length: usize,
    /// Set after an oversized line was reported; bytes are dropped until
    /// the next terminator.
    discarding: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    /// Create a decoder with the default length bound.
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    /// Create a decoder with a custom length bound.
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_line_length.min(4096) + 1),
            max_line_length,
            discarding: false,
        }
    }

    /// Append received bytes to the internal buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes buffered but not yet returned as a line.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Try to extract the next complete line.
    ///
    /// Returns `Ok(None)` if more data is needed. An oversized or non-UTF-8
    /// line is consumed and reported as an error; subsequent calls continue
    /// with the following line.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == LINE_TERMINATOR) {
                let raw = self.buffer.split_to(pos + 1);

                if self.discarding {
                    // Tail of a line already reported as too long.
                    self.discarding = false;
                    continue;
                }

                let mut line = &raw[..pos];
                if line.last() == Some(&b'\r') {
                    line = &line[..line.len() - 1];
                }

                if line.len() > self.max_line_length {
                    return Err(ProtocolError::LineTooLong {
                        size: line.len(),
                        max: self.max_line_length,
                    });
                }

                return Ok(Some(String::from_utf8(line.to_vec())?));
            }

            // A trailing `\r` may be the first half of a CRLF terminator.
            let pending_cr = usize::from(self.buffer.last() == Some(&b'\r'));
            if self.buffer.len() > self.max_line_length + pending_cr {
                let size = self.buffer.len();
                self.buffer.advance(size);
                if self.discarding {
                    return Ok(None);
                }
                self.discarding = true;
                return Err(ProtocolError::LineTooLong {
                    size,
                    max: self.max_line_length,
                });
            }

            return Ok(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_appends_terminator() {
        let codec = LineCodec::new();
        assert_eq!(codec.encode("read f1").unwrap(), b"read f1\n".to_vec());
    }

    #[test]
    fn test_encode_rejects_embedded_newline() {
        let codec = LineCodec::new();
        assert_eq!(
            codec.encode("read f1\nread f2"),
            Err(ProtocolError::EmbeddedNewline)
        );
    }

    #[test]
    fn test_encode_rejects_oversized_line() {
        let codec = LineCodec::with_max_line_length(8);
        assert!(matches!(
            codec.encode("create something rwrnnn"),
            Err(ProtocolError::LineTooLong { max: 8, .. })
        ));
    }

    #[test]
    fn test_decoder_waits_for_terminator() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"create f1 ");
        assert_eq!(decoder.next_line().unwrap(), None);

        decoder.push(b"rwrnnn\n");
        assert_eq!(
            decoder.next_line().unwrap(),
            Some("create f1 rwrnnn".to_string())
        );
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_decoder_splits_coalesced_lines() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"alice G1\nread f1\nwri");

        assert_eq!(decoder.next_line().unwrap(), Some("alice G1".to_string()));
        assert_eq!(decoder.next_line().unwrap(), Some("read f1".to_string()));
        assert_eq!(decoder.next_line().unwrap(), None);
        assert_eq!(decoder.buffered_len(), 3);
    }

    #[test]
    fn test_decoder_strips_carriage_return() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"read f1\r\n");
        assert_eq!(decoder.next_line().unwrap(), Some("read f1".to_string()));
    }

    #[test]
    fn test_decoder_returns_empty_line() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"\n");
        assert_eq!(decoder.next_line().unwrap(), Some(String::new()));
    }

    #[test]
    fn test_decoder_recovers_after_oversized_line() {
        let mut decoder = LineDecoder::with_max_line_length(8);
        decoder.push(b"0123456789abcdef");
        assert!(matches!(
            decoder.next_line(),
            Err(ProtocolError::LineTooLong { max: 8, .. })
        ));

        // Remainder of the oversized line is dropped silently.
        decoder.push(b"still-the-same-line\nread f1\n");
        assert_eq!(decoder.next_line().unwrap(), Some("read f1".to_string()));
    }

    #[test]
    fn test_decoder_accepts_full_length_crlf_split_across_reads() {
        let mut decoder = LineDecoder::with_max_line_length(8);
        decoder.push(b"12345678\r");
        assert_eq!(decoder.next_line().unwrap(), None);
        decoder.push(b"\n");
        assert_eq!(decoder.next_line().unwrap(), Some("12345678".to_string()));
    }

    #[test]
    fn test_decoder_rejects_overlong_line_ending_in_carriage_return() {
        let mut decoder = LineDecoder::with_max_line_length(8);
        decoder.push(b"123456789\r");
        assert!(matches!(
            decoder.next_line(),
            Err(ProtocolError::LineTooLong { size: 10, max: 8 })
        ));
    }

    #[test]
    fn test_decoder_rejects_complete_oversized_line() {
        let mut decoder = LineDecoder::with_max_line_length(4);
        decoder.push(b"toolong\nok\n");
        assert!(decoder.next_line().is_err());
        assert_eq!(decoder.next_line().unwrap(), Some("ok".to_string()));
    }

    #[test]
    fn test_decoder_rejects_invalid_utf8() {
        let mut decoder = LineDecoder::new();
        decoder.push(&[0xff, 0xfe, b'\n', b'o', b'k', b'\n']);
        assert!(matches!(
            decoder.next_line(),
            Err(ProtocolError::InvalidUtf8(_))
        ));
        assert_eq!(decoder.next_line().unwrap(), Some("ok".to_string()));
    }

    #[test]
    fn test_codec_decoder_shares_bound() {
        let codec = LineCodec::with_max_line_length(16);
        let decoder = codec.decoder();
        assert_eq!(decoder.max_line_length, 16);
    }
}
