//! Error types for the Scriptflow content graph engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias for Scriptflow operations.
pub type Result<T> = std::result::Result<T, ScriptflowError>;

/// Machine-checkable classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing input, caught before any mutation
    Validation,
    /// Caller lacks the required capability
    Authorization,
    /// Referenced node or snapshot is absent
    NotFound,
    /// Lock held by another holder, or duplicate identifier
    Conflict,
    /// Some items of a batch failed (reported alongside a success payload)
    PartialFailure,
    /// Underlying persistence error, not recoverable locally
    StorageFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::PartialFailure => "partial_failure",
            Self::StorageFailure => "storage_failure",
        };
        f.write_str(s)
    }
}

/// Steps of a snapshot restore, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStage {
    LoadSnapshot,
    ClearInboundEdges,
    ClearOutgoingEdges,
    ClearSatellites,
    ClearNodes,
    InsertNodes,
    InsertSatellites,
    InsertEdges,
}

impl RestoreStage {
    /// All stages in the order restore runs them.
    pub const ALL: [RestoreStage; 8] = [
        RestoreStage::LoadSnapshot,
        RestoreStage::ClearInboundEdges,
        RestoreStage::ClearOutgoingEdges,
        RestoreStage::ClearSatellites,
        RestoreStage::ClearNodes,
        RestoreStage::InsertNodes,
        RestoreStage::InsertSatellites,
        RestoreStage::InsertEdges,
    ];

    /// Stages that completed before this one started.
    pub fn completed_before(self) -> Vec<RestoreStage> {
        Self::ALL.iter().copied().take_while(|s| *s != self).collect()
    }
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LoadSnapshot => "load snapshot",
            Self::ClearInboundEdges => "clear inbound edges",
            Self::ClearOutgoingEdges => "clear outgoing edges",
            Self::ClearSatellites => "clear satellites",
            Self::ClearNodes => "clear nodes",
            Self::InsertNodes => "insert nodes",
            Self::InsertSatellites => "insert satellites",
            Self::InsertEdges => "insert edges",
        };
        f.write_str(s)
    }
}

/// Main error type for the Scriptflow system.
#[derive(Debug, thiserror::Error)]
pub enum ScriptflowError {
    /// Invalid input errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Capability errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Edit lease held by someone else
    #[error("Node {node_id} is being edited by {holder} until {expires_at}")]
    LockConflict {
        node_id: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },

    /// Identifier already in use
    #[error("Duplicate identifier: {0}")]
    DuplicateId(String),

    /// A satellite collection write failed for one node
    #[error("Failed to write {collection} for node {node_id}: {reason}")]
    SatelliteWrite {
        node_id: String,
        collection: String,
        reason: String,
    },

    /// Restore stopped partway; the official subgraph is partially restored
    #[error(
        "Restore of snapshot {snapshot_id} interrupted during '{stage}' \
         (completed: {completed_stages:?}): {reason}. Retry the restore to converge."
    )]
    RestoreInterrupted {
        snapshot_id: String,
        stage: RestoreStage,
        completed_stages: Vec<RestoreStage>,
        reason: String,
    },

    /// Storage layer errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database connection errors
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScriptflowError {
    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new authorization error
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create a new not found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a new satellite write error
    pub fn satellite_write(
        node_id: impl Into<String>,
        collection: impl fmt::Display,
        reason: impl fmt::Display,
    ) -> Self {
        Self::SatelliteWrite {
            node_id: node_id.into(),
            collection: collection.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a failure at `stage` of restoring `snapshot_id`
    pub fn restore_interrupted(
        snapshot_id: impl Into<String>,
        stage: RestoreStage,
        cause: &ScriptflowError,
    ) -> Self {
        Self::RestoreInterrupted {
            snapshot_id: snapshot_id.into(),
            stage,
            completed_stages: stage.completed_before(),
            reason: cause.to_string(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Config(_) => ErrorKind::Validation,
            Self::Unauthorized(_) => ErrorKind::Authorization,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::LockConflict { .. } | Self::DuplicateId(_) => ErrorKind::Conflict,
            Self::SatelliteWrite { .. } => ErrorKind::PartialFailure,
            Self::RestoreInterrupted { .. }
            | Self::Storage(_)
            | Self::Database(_)
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::Internal(_) => ErrorKind::StorageFailure,
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is an authorization error
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Check if this is a conflict (lock or duplicate id)
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ScriptflowError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(ScriptflowError::unauthorized("x").kind(), ErrorKind::Authorization);
        assert_eq!(ScriptflowError::not_found("node", "n1").kind(), ErrorKind::NotFound);
        assert_eq!(ScriptflowError::DuplicateId("n1".into()).kind(), ErrorKind::Conflict);
        assert_eq!(ScriptflowError::storage("disk").kind(), ErrorKind::StorageFailure);
    }

    #[test]
    fn test_restore_interrupted_reports_progress() {
        let cause = ScriptflowError::storage("connection reset");
        let err = ScriptflowError::restore_interrupted("s1", RestoreStage::InsertNodes, &cause);

        match &err {
            ScriptflowError::RestoreInterrupted {
                stage,
                completed_stages,
                ..
            } => {
                assert_eq!(*stage, RestoreStage::InsertNodes);
                assert_eq!(completed_stages.len(), 5);
                assert_eq!(completed_stages.last(), Some(&RestoreStage::ClearNodes));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let msg = err.to_string();
        assert!(msg.contains("insert nodes"));
        assert!(msg.contains("connection reset"));
    }
}
