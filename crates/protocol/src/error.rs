//! Error types for the protocol crate.

use thiserror::Error;

use crate::messages::Status;

/// Protocol error type covering every way a line can fail to frame or parse.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    // Framing errors
    /// Line exceeds the maximum allowed length.
    #[error("line too long: {size} bytes exceeds maximum of {max} bytes")]
    LineTooLong {
        /// Observed line size (possibly partial).
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Line contains an embedded newline and cannot be framed.
    #[error("line contains an embedded newline")]
    EmbeddedNewline,

    /// Line is not valid UTF-8.
    #[error("line is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    // Command errors
    /// Line contained no tokens.
    #[error("empty command")]
    EmptyCommand,

    /// First token is not a known verb.
    #[error("unknown command: {0}")]
    UnknownVerb(String),

    /// A required argument was not supplied.
    #[error("{verb}: missing argument <{argument}>")]
    MissingArgument {
        /// Verb being parsed.
        verb: &'static str,
        /// Name of the missing argument.
        argument: &'static str,
    },

    /// More tokens than the verb accepts.
    #[error("{verb}: unexpected argument '{argument}'")]
    UnexpectedArgument {
        /// Verb being parsed.
        verb: &'static str,
        /// First surplus token.
        argument: String,
    },

    /// Permission token is not six characters of the form `[rn][wn]` x3.
    #[error("invalid permissions '{0}': expected 6 characters such as rwrnnn")]
    InvalidPermissions(String),

    /// Write mode is neither `o` nor `a`.
    #[error("invalid write mode '{0}': expected o (overwrite) or a (append)")]
    InvalidMode(String),

    /// A field exceeds its length bound.
    #[error("{field} too long: {len} characters exceeds maximum of {max}")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Observed length.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// File name is not a single plain path component.
    #[error("invalid file name '{0}'")]
    InvalidName(String),

    // Login errors
    /// Login line is malformed.
    #[error("invalid login: {0}")]
    InvalidLogin(String),

    // Serialization errors
    /// Failed to serialize a response.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize a response.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

impl ProtocolError {
    /// The response status a server reports for this error.
    pub fn status(&self) -> Status {
        match self {
            ProtocolError::LineTooLong { .. }
            | ProtocolError::EmbeddedNewline
            | ProtocolError::InvalidUtf8(_)
            | ProtocolError::InvalidPermissions(_)
            | ProtocolError::InvalidMode(_)
            | ProtocolError::FieldTooLong { .. }
            | ProtocolError::InvalidName(_) => Status::FormatError,
            ProtocolError::EmptyCommand
            | ProtocolError::UnknownVerb(_)
            | ProtocolError::MissingArgument { .. }
            | ProtocolError::UnexpectedArgument { .. }
            | ProtocolError::Serialization(_)
            | ProtocolError::Deserialization(_) => Status::InvalidCommand,
            ProtocolError::InvalidLogin(_) => Status::LoginRejected,
        }
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

impl From<std::string::FromUtf8Error> for ProtocolError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        ProtocolError::InvalidUtf8(err.to_string())
    }
}
