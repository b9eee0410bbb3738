//! # capfs Daemon Library
//!
//! This crate provides the server side of capfs: a multi-client network
//! file service whose files are guarded by Unix-style owner/group/other
//! read/write permissions and serialized per file with reader-writer locks.
//!
//! ## Overview
//!
//! - **File Registry**: fixed-capacity capability list of named entries
//! - **Permission Evaluation**: exclusive owner > group > other classes
//! - **Command Dispatch**: `create`, `change`, `read` and `write` under the
//!   entry lock, with simulated slow I/O
//! - **Sessions**: login, then one response per command line
//! - **Server**: TCP accept loop with supervised, cancellable session tasks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          File Server                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌───────────────┐  ┌───────────────┐  ┌───────────────┐        │
//! │  │   Session     │  │   Session     │  │   Session     │  ...   │
//! │  └───────┬───────┘  └───────┬───────┘  └───────┬───────┘        │
//! │          └──────────────────┼──────────────────┘                │
//! │  ┌──────────────────────────▼─────────────────────────────────┐ │
//! │  │                   Command Dispatcher                       │ │
//! │  └──────────────────────────┬─────────────────────────────────┘ │
//! │  ┌───────────────────┐  ┌───▼───────────────┐  ┌─────────────┐  │
//! │  │   Permissions     │  │   File Registry   │  │   Storage   │  │
//! │  └───────────────────┘  └───────────────────┘  └─────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, FileServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut server = FileServer::new(config)?;
//!     let addr = server.start().await?;
//!     println!("listening on {}", addr);
//!
//!     // Wait for shutdown signal...
//!
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: Registry, permission evaluation and backing storage
//! - [`dispatcher`]: Command execution and error-to-status mapping
//! - [`session`]: Framed connections and the per-client session handler
//! - [`server`]: TCP listener and session supervision
//! - [`client`]: Programmatic client
//! - [`logging`]: Tracing subscriber setup

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod files;
pub mod logging;
pub mod server;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export files types for convenience
pub use files::{
    evaluate, Access, EntryMetadata, EntrySnapshot, FileEntry, FileRegistry, FileStorage, Identity,
    Operation, RegistryError, StorageError,
};

// Re-export dispatcher types for convenience
pub use dispatcher::{CommandDispatcher, DispatchError, NoticeSender};

// Re-export session types for convenience
pub use session::{
    ClientSession, Connection, SessionEnd, SessionError, SessionHandler, SessionId, SessionState,
};

// Re-export server types for convenience
pub use server::{FileServer, ServerEvent, ServerState};

// Re-export client types for convenience
pub use client::{ClientError, FileClient};
