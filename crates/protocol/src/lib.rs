//! # capfs Protocol Library
//!
//! Wire-level types shared by the capfs daemon and its clients.
//!
//! ## Overview
//!
//! - **Framing**: newline-delimited lines with an explicit length bound
//! - **Messages**: login line, commands, permission tokens and responses
//! - **Errors**: one error type, each variant mapping to a response status
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Login / Command (text) ─ Response     │  JSON response objects
//! ├─────────────────────────────────────────┤
//! │              Framing                    │  '\n'-delimited, bounded
//! ├─────────────────────────────────────────┤
//! │           Transport (TCP)               │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Command, LineCodec, LineDecoder, Response, Status};
//!
//! let codec = LineCodec::new();
//! let bytes = codec.encode("create f1 rwrnnn").unwrap();
//!
//! let mut decoder = LineDecoder::new();
//! decoder.push(&bytes);
//! let line = decoder.next_line().unwrap().unwrap();
//! let command = Command::parse(&line).unwrap();
//! assert_eq!(command.verb(), "create");
//!
//! let response = Response::ok("created f1");
//! assert_eq!(response.status, Status::Ok);
//! ```
//!
//! ## Modules
//!
//! - [`framing`]: line encoder and incremental decoder
//! - [`messages`]: protocol message definitions
//! - [`error`]: error types

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use framing::{LineCodec, LineDecoder, LINE_TERMINATOR, MAX_LINE_LENGTH};
pub use messages::{
    validate_identity, validate_name, Command, Login, PermissionClass, Permissions, Response,
    Status, WriteMode, MAX_IDENTITY_LENGTH, MAX_NAME_LENGTH, PERMISSIONS_LENGTH,
};
