//! Backing content for registry entries.
//!
//! Every entry has a same-named file in the storage directory. Callers are
//! expected to hold the entry's lock (shared for reads, exclusive for
//! writes) around every call here; this module does no locking of its own.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use protocol::WriteMode;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Timestamp format used in write records.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d-%H:%M:%S";

/// Errors from backing storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O operation on a backing file failed.
    #[error("{operation} failed for {name}: {source}")]
    Io {
        /// What was being done.
        operation: &'static str,
        /// Entry name.
        name: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn io(operation: &'static str, name: &str, source: io::Error) -> Self {
        StorageError::Io {
            operation,
            name: name.to_string(),
            source,
        }
    }
}

/// Current local time in record format, e.g. `2024/05/01-13:45:09`.
pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// The line appended by a write.
pub fn record_line(user: &str, timestamp: &str) -> String {
    format!("{} wrote here at {}\n", user, timestamp)
}

/// The line a new entry starts with.
pub fn initializer_line(name: &str) -> String {
    format!("Init file: {}\n", name)
}

/// File-backed content store rooted at one directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Create a store rooted at `root`. The directory is not created.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the storage directory if it is missing.
    pub async fn ensure_root(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::io("create storage directory", "<root>", e))
    }

    /// Storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of an entry's backing file. `name` must already be validated
    /// as a single path component.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Write the initializer line, replacing any stale content.
    pub async fn initialize(&self, name: &str) -> Result<(), StorageError> {
        fs::write(self.path_for(name), initializer_line(name))
            .await
            .map_err(|e| StorageError::io("initialize", name, e))
    }

    /// Read the full content.
    pub async fn read(&self, name: &str) -> Result<String, StorageError> {
        fs::read_to_string(self.path_for(name))
            .await
            .map_err(|e| StorageError::io("read", name, e))
    }

    /// Write an attributed record, replacing or appending per `mode`.
    pub async fn write_record(
        &self,
        name: &str,
        user: &str,
        mode: WriteMode,
        timestamp: &str,
    ) -> Result<(), StorageError> {
        let mut options = OpenOptions::new();
        match mode {
            WriteMode::Overwrite => options.write(true).create(true).truncate(true),
            WriteMode::Append => options.append(true).create(true),
        };

        let mut file = options
            .open(self.path_for(name))
            .await
            .map_err(|e| StorageError::io("open", name, e))?;
        file.write_all(record_line(user, timestamp).as_bytes())
            .await
            .map_err(|e| StorageError::io("write", name, e))?;
        file.flush()
            .await
            .map_err(|e| StorageError::io("flush", name, e))?;
        Ok(())
    }
}
