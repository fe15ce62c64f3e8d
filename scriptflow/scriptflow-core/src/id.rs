//! Identifier types for script nodes and snapshots.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Identifier of a snapshot artifact.
pub type SnapshotId = String;

/// Identifier of a product (content collection).
pub type ProductId = String;

/// Identity of a caller (author or administrator).
pub type UserId = String;

/// Globally unique identifier of a script node.
///
/// Generated identifiers are UUIDv4 strings; seeded or imported nodes may
/// carry any non-empty string. An identifier is never reused for an
/// unrelated node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the inner string
    pub fn into_inner(self) -> String {
        self.0
    }

    /// An identifier is well-formed when it is non-empty and has no
    /// surrounding whitespace.
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty() && self.0.trim() == self.0
    }
}

/// Create a fresh snapshot identifier
pub fn new_snapshot_id() -> SnapshotId {
    Uuid::new_v4().to_string()
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for NodeId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for NodeId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
