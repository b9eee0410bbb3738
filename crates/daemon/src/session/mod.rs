//! Client sessions.
//!
//! This module provides the framed connection used on both ends of the
//! wire and the handler that runs one logged-in client per connection.

pub mod connection;
pub mod handler;

pub use connection::{Connection, SessionError};
pub use handler::{ClientSession, SessionEnd, SessionHandler, SessionId, SessionState};
