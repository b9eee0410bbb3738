//! Command dispatcher.
//!
//! Turns one request line from an authenticated session into exactly one
//! final [`Response`]: parse, validate, execute against the registry and
//! storage, then map any failure onto a response status.
//!
//! Every entry lock taken here is a scoped guard. If the future running a
//! command is dropped (session teardown, server shutdown) the guard is
//! dropped with it and the entry is released.

use std::sync::Arc;

use protocol::{Command, Permissions, ProtocolError, Response, Status, WriteMode};
use tokio::sync::{mpsc, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::config::TimingConfig;
use crate::files::permissions::{self, Identity, Operation};
use crate::files::registry::{EntryMetadata, FileEntry, FileRegistry, RegistryError};
use crate::files::storage::{self, FileStorage, StorageError};

/// Channel for interim notices sent while a command waits on a lock.
pub type NoticeSender = mpsc::UnboundedSender<Response>;

/// Errors that end a command without success.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The line did not parse or an argument failed validation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Every registry slot is taken.
    #[error("no space left: all {capacity} file slots are in use")]
    SpaceExhausted {
        /// Registry capacity.
        capacity: usize,
    },

    /// An entry with that name exists already.
    #[error("file already exists: {0}")]
    AlreadyExists(String),

    /// No entry with that name.
    #[error("file not found: {0}")]
    NotFound(String),

    /// Requester is not the entry's owner.
    #[error("not the owner of {0}")]
    NotOwner(String),

    /// Requester's permission class lacks the right.
    #[error("permission denied: cannot {operation} {name}")]
    PermissionDenied {
        /// Entry name.
        name: String,
        /// Refused operation.
        operation: Operation,
    },

    /// Backing storage failed.
    #[error("i/o error: {0}")]
    Io(#[from] StorageError),
}

impl DispatchError {
    /// Response status for this error.
    pub fn status(&self) -> Status {
        match self {
            DispatchError::Protocol(e) => e.status(),
            DispatchError::SpaceExhausted { .. } => Status::SpaceExhausted,
            DispatchError::AlreadyExists(_) => Status::AlreadyExists,
            DispatchError::NotFound(_) => Status::NotFound,
            DispatchError::NotOwner(_) => Status::NotOwner,
            DispatchError::PermissionDenied { .. } => Status::PermissionDenied,
            DispatchError::Io(_) => Status::IoError,
        }
    }

    /// Convert the error to a response.
    pub fn to_response(&self) -> Response {
        Response::new(self.status(), self.to_string())
    }
}

impl From<RegistryError> for DispatchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::SpaceExhausted { capacity } => DispatchError::SpaceExhausted { capacity },
            RegistryError::AlreadyExists(name) => DispatchError::AlreadyExists(name),
            RegistryError::NotFound(name) => DispatchError::NotFound(name),
        }
    }
}

/// Routes parsed commands to the registry and storage.
#[derive(Debug)]
pub struct CommandDispatcher {
    registry: Arc<FileRegistry>,
    storage: Arc<FileStorage>,
    timing: TimingConfig,
    contention_notice: bool,
}

impl CommandDispatcher {
    /// Create a dispatcher over a shared registry and store.
    pub fn new(registry: Arc<FileRegistry>, storage: Arc<FileStorage>, timing: TimingConfig) -> Self {
        Self {
            registry,
            storage,
            timing,
            contention_notice: false,
        }
    }

    /// Send a `waiting` notice before blocking on a busy entry.
    pub fn with_contention_notice(mut self, enabled: bool) -> Self {
        self.contention_notice = enabled;
        self
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<FileRegistry> {
        &self.registry
    }

    /// Parse and execute one request line.
    ///
    /// Always produces a final response; failures are reported through the
    /// response status.
    pub async fn dispatch_line(
        &self,
        requester: &Identity,
        line: &str,
        notices: Option<&NoticeSender>,
    ) -> Response {
        let result = match Command::parse(line) {
            Ok(command) => self.execute(requester, command, notices).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                debug!(user = %requester.user, status = %e.status(), error = %e, "Command failed");
                e.to_response()
            }
        }
    }

    /// Execute a parsed command.
    pub async fn execute(
        &self,
        requester: &Identity,
        command: Command,
        notices: Option<&NoticeSender>,
    ) -> Result<Response, DispatchError> {
        debug!(user = %requester.user, command = %command, "Dispatching command");

        match command {
            Command::Create { name, perms } => self.handle_create(requester, &name, perms).await,
            Command::Change { name, perms } => {
                self.handle_change(requester, &name, perms, notices).await
            }
            Command::Read { name } => self.handle_read(requester, &name, notices).await,
            Command::Write { name, mode } => {
                self.handle_write(requester, &name, mode, notices).await
            }
        }
    }

    async fn handle_create(
        &self,
        requester: &Identity,
        name: &str,
        perms: Permissions,
    ) -> Result<Response, DispatchError> {
        let metadata = EntryMetadata {
            owner: requester.user.clone(),
            group: requester.group.clone(),
            perms,
        };
        let (entry, guard) = self.registry.allocate(name, metadata).await?;

        if let Err(e) = self.storage.initialize(name).await {
            warn!(file = %name, error = %e, "Failed to initialize backing file");
            self.registry.abandon(&entry).await;
            drop(guard);
            return Err(e.into());
        }
        drop(guard);

        info!(
            file = %name,
            owner = %requester.user,
            group = %requester.group,
            perms = %perms,
            slot = entry.slot(),
            "Created file"
        );
        self.registry.log_capability_list();

        Ok(Response::ok(format!("created {}", name)))
    }

    async fn handle_change(
        &self,
        requester: &Identity,
        name: &str,
        perms: Permissions,
        notices: Option<&NoticeSender>,
    ) -> Result<Response, DispatchError> {
        let entry = self.registry.lookup(name)?;
        let mut metadata = self.acquire_write(&entry, notices).await;

        if metadata.owner != requester.user {
            return Err(DispatchError::NotOwner(name.to_string()));
        }

        let previous = metadata.perms;
        metadata.perms = perms;
        drop(metadata);

        info!(file = %name, from = %previous, to = %perms, "Changed permissions");
        self.registry.log_capability_list();

        Ok(Response::ok(format!("permissions of {} set to {}", name, perms)))
    }

    async fn handle_read(
        &self,
        requester: &Identity,
        name: &str,
        notices: Option<&NoticeSender>,
    ) -> Result<Response, DispatchError> {
        let entry = self.registry.lookup(name)?;
        let metadata = self.acquire_read(&entry, notices).await;

        if !permissions::evaluate(&metadata, requester).allows(Operation::Read) {
            return Err(DispatchError::PermissionDenied {
                name: name.to_string(),
                operation: Operation::Read,
            });
        }

        debug!(file = %name, user = %requester.user, "Reading (shared lock held)");
        tokio::time::sleep(self.timing.read_delay()).await;
        let content = self.storage.read(name).await?;
        drop(metadata);

        Ok(Response::ok(content.trim_end_matches('\n')))
    }

    async fn handle_write(
        &self,
        requester: &Identity,
        name: &str,
        mode: WriteMode,
        notices: Option<&NoticeSender>,
    ) -> Result<Response, DispatchError> {
        let entry = self.registry.lookup(name)?;
        let metadata = self.acquire_write(&entry, notices).await;

        if !permissions::evaluate(&metadata, requester).allows(Operation::Write) {
            return Err(DispatchError::PermissionDenied {
                name: name.to_string(),
                operation: Operation::Write,
            });
        }

        debug!(file = %name, user = %requester.user, mode = ?mode, "Writing (exclusive lock held)");
        tokio::time::sleep(self.timing.write_delay()).await;
        let timestamp = storage::timestamp_now();
        self.storage
            .write_record(name, &requester.user, mode, &timestamp)
            .await?;
        drop(metadata);

        info!(file = %name, user = %requester.user, mode = ?mode, "Wrote record");
        Ok(Response::ok(format!("wrote {} at {}", name, timestamp)))
    }

    async fn acquire_read<'a>(
        &self,
        entry: &'a FileEntry,
        notices: Option<&NoticeSender>,
    ) -> RwLockReadGuard<'a, EntryMetadata> {
        if let Some(guard) = entry.try_read() {
            return guard;
        }
        self.notify_waiting(entry, notices);
        entry.read().await
    }

    async fn acquire_write<'a>(
        &self,
        entry: &'a FileEntry,
        notices: Option<&NoticeSender>,
    ) -> RwLockWriteGuard<'a, EntryMetadata> {
        if let Some(guard) = entry.try_write() {
            return guard;
        }
        self.notify_waiting(entry, notices);
        entry.write().await
    }

    fn notify_waiting(&self, entry: &FileEntry, notices: Option<&NoticeSender>) {
        debug!(file = %entry.name(), "Entry busy, waiting for lock");
        if !self.contention_notice {
            return;
        }
        if let Some(tx) = notices {
            // Receiver gone means the session is closing; nothing to tell.
            let _ = tx.send(Response::waiting(entry.name()));
        }
    }
}
