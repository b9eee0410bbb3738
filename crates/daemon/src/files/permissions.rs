//! Owner/group/other permission evaluation.
//!
//! A requester falls into exactly one permission class for a given entry:
//! owner if the user matches, otherwise group if the group matches,
//! otherwise other. Only that class's two-character slice of the
//! permission string is consulted. Classes never combine, so an owner whose
//! own slice is `nn` is denied even when the group slice would allow.

use std::fmt;

use protocol::{Login, PermissionClass, Permissions};
use serde::{Deserialize, Serialize};

use super::registry::EntryMetadata;

/// An authenticated requester.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// User name.
    pub user: String,
    /// Group name.
    pub group: String,
}

impl Identity {
    /// Create an identity.
    pub fn new(user: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            group: group.into(),
        }
    }
}

impl From<Login> for Identity {
    fn from(login: Login) -> Self {
        Self {
            user: login.user,
            group: login.group,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user, self.group)
    }
}

/// Operations gated by the permission string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Read content.
    Read,
    /// Write content.
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => f.write_str("read"),
            Operation::Write => f.write_str("write"),
        }
    }
}

/// Rights resolved for one requester against one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    /// Class the requester was placed in.
    pub class: PermissionClass,
    /// Read allowed.
    pub read: bool,
    /// Write allowed.
    pub write: bool,
}

impl Access {
    /// Whether the operation is allowed.
    pub fn allows(&self, operation: Operation) -> bool {
        match operation {
            Operation::Read => self.read,
            Operation::Write => self.write,
        }
    }
}

/// Place a requester in the owner, group or other class.
pub fn classify(owner: &str, group: &str, requester: &Identity) -> PermissionClass {
    if requester.user == owner {
        PermissionClass::Owner
    } else if requester.group == group {
        PermissionClass::Group
    } else {
        PermissionClass::Other
    }
}

/// Resolve a requester's rights from a class and permission string.
pub fn resolve(perms: &Permissions, class: PermissionClass) -> Access {
    Access {
        class,
        read: perms.can_read(class),
        write: perms.can_write(class),
    }
}

/// Resolve a requester's rights on an entry.
pub fn evaluate(metadata: &EntryMetadata, requester: &Identity) -> Access {
    let class = classify(&metadata.owner, &metadata.group, requester);
    resolve(&metadata.perms, class)
}
