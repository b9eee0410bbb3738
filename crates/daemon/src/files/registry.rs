//! File registry: the server's capability list.
//!
//! The registry maps file names to entries. Each entry carries its owner,
//! group and permission string behind a per-entry reader-writer lock, and
//! the same lock serializes access to the entry's backing content. There
//! is no separate metadata lock, so permission edits and permission checks
//! are ordered with respect to reads and writes.
//!
//! # Locking
//!
//! - The directory lock is held only while checking capacity and claiming
//!   a slot in [`FileRegistry::allocate`]. It is never held across I/O.
//! - Lookups go through the concurrent map and take no directory lock.
//! - Entry locks are `tokio::sync::RwLock`, which queues waiters in FIFO
//!   order: once a writer is waiting, later readers queue behind it, so a
//!   steady stream of readers cannot starve a writer.
//! - No operation holds two entry locks at once.

use std::sync::Arc;

use dashmap::DashMap;
use protocol::Permissions;
use serde::Serialize;
use tokio::sync::{
    Mutex, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Every slot is occupied.
    #[error("no free slot: registry capacity of {capacity} reached")]
    SpaceExhausted {
        /// Registry capacity.
        capacity: usize,
    },

    /// An entry with this name is already registered.
    #[error("file already exists: {0}")]
    AlreadyExists(String),

    /// No entry with this name.
    #[error("file not found: {0}")]
    NotFound(String),
}

/// Access-control state of an entry. Guarded by the entry lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryMetadata {
    /// Owning user.
    pub owner: String,
    /// Owning group.
    pub group: String,
    /// Permission string.
    pub perms: Permissions,
}

/// A registered file.
#[derive(Debug)]
pub struct FileEntry {
    name: String,
    slot: usize,
    state: Arc<RwLock<EntryMetadata>>,
}

impl FileEntry {
    /// File name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slot index claimed at allocation.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Acquire the entry's shared lock.
    pub async fn read(&self) -> RwLockReadGuard<'_, EntryMetadata> {
        self.state.read().await
    }

    /// Acquire the entry's exclusive lock.
    pub async fn write(&self) -> RwLockWriteGuard<'_, EntryMetadata> {
        self.state.write().await
    }

    /// Acquire the shared lock without waiting.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, EntryMetadata>> {
        self.state.try_read().ok()
    }

    /// Acquire the exclusive lock without waiting.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, EntryMetadata>> {
        self.state.try_write().ok()
    }
}

/// One row of the capability list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
    /// Slot index.
    pub slot: usize,
    /// File name.
    pub name: String,
    /// Metadata, or `None` if a writer held the entry when the snapshot
    /// was taken.
    pub metadata: Option<EntryMetadata>,
}

/// Slot bookkeeping guarded by the directory lock.
#[derive(Debug, Default)]
struct Directory {
    next_slot: usize,
}

/// Fixed-capacity registry of file entries.
///
/// Constructed once by the server and shared with every session through an
/// `Arc`.
#[derive(Debug)]
pub struct FileRegistry {
    entries: DashMap<String, Arc<FileEntry>>,
    directory: Mutex<Directory>,
    capacity: usize,
}

impl FileRegistry {
    /// Create an empty registry with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
            directory: Mutex::new(Directory::default()),
            capacity,
        }
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry has been created yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Claim a slot for a new entry.
    ///
    /// Capacity is checked before the name, so a full registry always
    /// reports [`RegistryError::SpaceExhausted`]. The new entry is visible
    /// to [`lookup`](Self::lookup) as soon as this returns; the returned
    /// write guard keeps other sessions out until the caller has
    /// initialized the backing content.
    pub async fn allocate(
        &self,
        name: &str,
        metadata: EntryMetadata,
    ) -> Result<(Arc<FileEntry>, OwnedRwLockWriteGuard<EntryMetadata>), RegistryError> {
        let mut directory = self.directory.lock().await;

        if self.entries.len() >= self.capacity {
            return Err(RegistryError::SpaceExhausted {
                capacity: self.capacity,
            });
        }
        if self.entries.contains_key(name) {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }

        let slot = directory.next_slot;
        directory.next_slot += 1;

        let state = Arc::new(RwLock::new(metadata));
        // Uncontended: nobody else can reach this lock yet.
        let guard = Arc::clone(&state).write_owned().await;

        let entry = Arc::new(FileEntry {
            name: name.to_string(),
            slot,
            state,
        });
        self.entries.insert(name.to_string(), Arc::clone(&entry));

        tracing::debug!(file = %name, slot, "Allocated registry slot");
        Ok((entry, guard))
    }

    /// Remove an entry whose creation failed part-way.
    ///
    /// Only the creator calls this, while still holding the write guard
    /// returned by [`allocate`](Self::allocate).
    pub async fn abandon(&self, entry: &FileEntry) {
        let _directory = self.directory.lock().await;
        let removed = self
            .entries
            .remove_if(entry.name(), |_, existing| existing.slot == entry.slot);
        if removed.is_some() {
            tracing::debug!(file = %entry.name(), slot = entry.slot, "Abandoned registry slot");
        }
    }

    /// Find an entry by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<FileEntry>, RegistryError> {
        self.entries
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Capability list in slot order.
    ///
    /// Does not wait on entry locks; entries held by a writer are listed
    /// without metadata.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let mut rows: Vec<EntrySnapshot> = self
            .entries
            .iter()
            .map(|entry| {
                let entry = entry.value();
                EntrySnapshot {
                    slot: entry.slot,
                    name: entry.name.clone(),
                    metadata: entry.try_read().map(|meta| (*meta).clone()),
                }
            })
            .collect();
        rows.sort_by_key(|row| row.slot);
        rows
    }

    /// Emit the capability list at debug level.
    pub fn log_capability_list(&self) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        for row in self.snapshot() {
            match row.metadata {
                Some(meta) => tracing::debug!(
                    slot = row.slot,
                    file = %row.name,
                    owner = %meta.owner,
                    group = %meta.group,
                    perms = %meta.perms,
                    "Capability list entry"
                ),
                None => tracing::debug!(
                    slot = row.slot,
                    file = %row.name,
                    "Capability list entry (locked)"
                ),
            }
        }
    }
}
