//! File registry, access control and backing storage.
//!
//! This module provides:
//! - The registry of entries (name, owner, group, permission string) with
//!   a directory lock for allocation and a reader-writer lock per entry
//! - Owner/group/other permission evaluation
//! - The on-disk content behind each entry
//!
//! # Security
//!
//! Entry names are validated as single path components before they reach
//! storage, so backing files always live directly in the storage directory.

pub mod permissions;
pub mod registry;
pub mod storage;

pub use permissions::{evaluate, Access, Identity, Operation};
pub use registry::{EntryMetadata, EntrySnapshot, FileEntry, FileRegistry, RegistryError};
pub use storage::{FileStorage, StorageError};
