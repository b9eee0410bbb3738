//! Protocol message definitions.
//!
//! Requests are plain text so the verb/argument surface stays the same as a
//! hand-typed session:
//!
//! ```text
//! alice G1                 login line, sent once
//! create f1 rwrnnn         (alias: new)
//! change f1 rwrwrw
//! read f1
//! write f1 a               o = overwrite, a = append
//! ```
//!
//! Responses are single-line JSON objects carrying a [`Status`] and a
//! human-readable message.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Maximum length of a file name.
pub const MAX_NAME_LENGTH: usize = 49;

/// Maximum length of a user or group identity.
pub const MAX_IDENTITY_LENGTH: usize = 49;

/// Exact length of a permission token.
pub const PERMISSIONS_LENGTH: usize = 6;

/// One of the three permission classes, in permission-string order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionClass {
    /// The entry's owner.
    Owner,
    /// Members of the entry's group.
    Group,
    /// Everyone else.
    Other,
}

impl PermissionClass {
    /// Offset of this class's two-character slice in the permission string.
    pub const fn offset(self) -> usize {
        match self {
            PermissionClass::Owner => 0,
            PermissionClass::Group => 2,
            PermissionClass::Other => 4,
        }
    }
}

/// A validated six-character permission string such as `rwrnnn`.
///
/// Even positions are `r` or `n`, odd positions are `w` or `n`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permissions([u8; PERMISSIONS_LENGTH]);

impl Permissions {
    /// Parse and validate a permission token.
    pub fn parse(token: &str) -> Result<Self> {
        let bytes = token.as_bytes();
        if bytes.len() != PERMISSIONS_LENGTH {
            return Err(ProtocolError::InvalidPermissions(token.to_string()));
        }

        let valid = bytes.iter().enumerate().all(|(i, &b)| {
            if i % 2 == 0 {
                b == b'r' || b == b'n'
            } else {
                b == b'w' || b == b'n'
            }
        });
        if !valid {
            return Err(ProtocolError::InvalidPermissions(token.to_string()));
        }

        let mut perms = [0u8; PERMISSIONS_LENGTH];
        perms.copy_from_slice(bytes);
        Ok(Self(perms))
    }

    /// Whether the class's slice grants read.
    pub fn can_read(&self, class: PermissionClass) -> bool {
        self.0[class.offset()] == b'r'
    }

    /// Whether the class's slice grants write.
    pub fn can_write(&self, class: PermissionClass) -> bool {
        self.0[class.offset() + 1] == b'w'
    }

    /// The two-character slice for a class, e.g. `"rn"`.
    pub fn slice(&self, class: PermissionClass) -> &str {
        let offset = class.offset();
        // Only ASCII bytes are ever stored.
        std::str::from_utf8(&self.0[offset..offset + 2]).unwrap_or("nn")
    }

    /// The full permission string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("nnnnnn")
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Permissions").field(&self.as_str()).finish()
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permissions {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Permissions {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Permissions> for String {
    fn from(value: Permissions) -> Self {
        value.as_str().to_string()
    }
}

/// Write mode for the `write` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Replace all content (`o`).
    Overwrite,
    /// Append one record (`a`).
    Append,
}

impl WriteMode {
    /// Parse a one-character mode token.
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "o" => Ok(WriteMode::Overwrite),
            "a" => Ok(WriteMode::Append),
            other => Err(ProtocolError::InvalidMode(other.to_string())),
        }
    }

    /// The wire token for this mode.
    pub fn token(self) -> &'static str {
        match self {
            WriteMode::Overwrite => "o",
            WriteMode::Append => "a",
        }
    }
}

/// The login line sent once at the start of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    /// Claimed user identity.
    pub user: String,
    /// Claimed group identity.
    pub group: String,
}

impl Login {
    /// Create a login from identity strings.
    pub fn new(user: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            group: group.into(),
        }
    }

    /// Parse a `"<user> <group>"` line.
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let user = tokens
            .next()
            .ok_or_else(|| ProtocolError::InvalidLogin("missing user".to_string()))?;
        let group = tokens
            .next()
            .ok_or_else(|| ProtocolError::InvalidLogin("missing group".to_string()))?;
        if let Some(extra) = tokens.next() {
            return Err(ProtocolError::InvalidLogin(format!(
                "unexpected token '{}'",
                extra
            )));
        }

        validate_identity("user", user)?;
        validate_identity("group", group)?;

        Ok(Self::new(user, group))
    }
}

impl fmt::Display for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.user, self.group)
    }
}

/// Validate a user or group identity token.
///
/// Identities are non-empty, at most [`MAX_IDENTITY_LENGTH`] characters and
/// contain no whitespace or control characters.
pub fn validate_identity(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ProtocolError::InvalidLogin(format!("empty {}", field)));
    }
    let len = value.chars().count();
    if len > MAX_IDENTITY_LENGTH {
        return Err(ProtocolError::InvalidLogin(format!(
            "{} too long: {} characters exceeds maximum of {}",
            field, len, MAX_IDENTITY_LENGTH
        )));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ProtocolError::InvalidLogin(format!(
            "{} contains whitespace or control characters",
            field
        )));
    }
    Ok(())
}

/// Validate a file name.
///
/// Names map to files in the server's storage directory, so they must be a
/// single plain path component.
pub fn validate_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if len > MAX_NAME_LENGTH {
        return Err(ProtocolError::FieldTooLong {
            field: "name",
            len,
            max: MAX_NAME_LENGTH,
        });
    }
    if name.is_empty()
        || name == "."
        || name == ".."
        || name
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
    {
        return Err(ProtocolError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a new entry owned by the requester.
    Create {
        /// File name.
        name: String,
        /// Initial permissions.
        perms: Permissions,
    },
    /// Replace an entry's permissions (owner only).
    Change {
        /// File name.
        name: String,
        /// New permissions.
        perms: Permissions,
    },
    /// Read an entry's content.
    Read {
        /// File name.
        name: String,
    },
    /// Write an attributed, timestamped record.
    Write {
        /// File name.
        name: String,
        /// Overwrite or append.
        mode: WriteMode,
    },
}

impl Command {
    /// Parse a command line.
    ///
    /// For `create` and `change` the permission token is validated before
    /// anything else, so a bad token is reported even when the name is
    /// also missing or invalid.
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().ok_or(ProtocolError::EmptyCommand)?;

        let command = match verb {
            "create" | "new" => {
                let name = tokens.next();
                let perms = parse_permissions(tokens.next())?;
                let name = require_name("create", name)?;
                Command::Create { name, perms }
            }
            "change" => {
                let name = tokens.next();
                let perms = parse_permissions(tokens.next())?;
                let name = require_name("change", name)?;
                Command::Change { name, perms }
            }
            "read" => {
                let name = require_name("read", tokens.next())?;
                Command::Read { name }
            }
            "write" => {
                let name = tokens.next();
                let mode = match tokens.next() {
                    Some(token) => WriteMode::parse(token)?,
                    None => {
                        return Err(ProtocolError::MissingArgument {
                            verb: "write",
                            argument: "mode",
                        })
                    }
                };
                let name = require_name("write", name)?;
                Command::Write { name, mode }
            }
            other => return Err(ProtocolError::UnknownVerb(truncate(other, 16))),
        };

        if let Some(extra) = tokens.next() {
            return Err(ProtocolError::UnexpectedArgument {
                verb: command.verb(),
                argument: truncate(extra, 16),
            });
        }

        Ok(command)
    }

    /// The canonical verb.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::Change { .. } => "change",
            Command::Read { .. } => "read",
            Command::Write { .. } => "write",
        }
    }

    /// The file name this command targets.
    pub fn name(&self) -> &str {
        match self {
            Command::Create { name, .. }
            | Command::Change { name, .. }
            | Command::Read { name }
            | Command::Write { name, .. } => name,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Create { name, perms } => write!(f, "create {} {}", name, perms),
            Command::Change { name, perms } => write!(f, "change {} {}", name, perms),
            Command::Read { name } => write!(f, "read {}", name),
            Command::Write { name, mode } => write!(f, "write {} {}", name, mode.token()),
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn parse_permissions(token: Option<&str>) -> Result<Permissions> {
    Permissions::parse(token.unwrap_or(""))
}

fn require_name(verb: &'static str, token: Option<&str>) -> Result<String> {
    let name = token.ok_or(ProtocolError::MissingArgument {
        verb,
        argument: "name",
    })?;
    validate_name(name)?;
    Ok(name.to_string())
}

/// Clip untrusted tokens before echoing them back in errors.
fn truncate(token: &str, max_chars: usize) -> String {
    token.chars().take(max_chars).collect()
}

/// Outcome category of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Login accepted.
    LoginOk,
    /// Login refused; the server closes the connection.
    LoginRejected,
    /// Command succeeded.
    Ok,
    /// Informational: the target entry is locked and the request is queued.
    /// The final response follows.
    Waiting,
    /// Malformed permission token, mode, name or line.
    FormatError,
    /// Registry is full.
    SpaceExhausted,
    /// An entry with that name already exists.
    AlreadyExists,
    /// No entry with that name.
    NotFound,
    /// Requester does not own the entry.
    NotOwner,
    /// Requester's permission class lacks the needed right.
    PermissionDenied,
    /// Backing storage failed.
    IoError,
    /// Unknown verb or malformed argument list.
    InvalidCommand,
}

impl Status {
    /// Whether this status reports success.
    pub fn is_success(self) -> bool {
        matches!(self, Status::Ok | Status::LoginOk)
    }

    /// Whether this is an interim notice rather than a final response.
    pub fn is_interim(self) -> bool {
        matches!(self, Status::Waiting)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::LoginOk => "login_ok",
            Status::LoginRejected => "login_rejected",
            Status::Ok => "ok",
            Status::Waiting => "waiting",
            Status::FormatError => "format_error",
            Status::SpaceExhausted => "space_exhausted",
            Status::AlreadyExists => "already_exists",
            Status::NotFound => "not_found",
            Status::NotOwner => "not_owner",
            Status::PermissionDenied => "permission_denied",
            Status::IoError => "io_error",
            Status::InvalidCommand => "invalid_command",
        };
        f.write_str(s)
    }
}

/// A server response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Outcome category.
    pub status: Status,
    /// Human-readable message. For a successful `read` this is the content.
    pub message: String,
}

impl Response {
    /// Create a response.
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// A successful command response.
    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Status::Ok, message)
    }

    /// A login acceptance.
    pub fn login_ok(login: &Login) -> Self {
        Self::new(
            Status::LoginOk,
            format!("logged in as {} (group {})", login.user, login.group),
        )
    }

    /// An interim notice that the request is queued behind a lock.
    pub fn waiting(name: &str) -> Self {
        Self::new(
            Status::Waiting,
            format!("{} is busy, waiting for access", name),
        )
    }

    /// Serialize to a JSON string without the line terminator.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON line.
    pub fn from_json(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

impl From<ProtocolError> for Response {
    fn from(err: ProtocolError) -> Self {
        Response::new(err.status(), err.to_string())
    }
}
