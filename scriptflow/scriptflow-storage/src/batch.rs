//! Result payloads of multi-item operations.

use scriptflow_core::error::ScriptflowError;
use scriptflow_core::id::{NodeId, SnapshotId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Step of a per-node copy at which an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStage {
    InsertNode,
    Satellites,
    Responses,
    RevertOriginal,
}

impl fmt::Display for CopyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InsertNode => "insert node",
            Self::Satellites => "copy satellites",
            Self::Responses => "copy responses",
            Self::RevertOriginal => "revert original",
        };
        f.write_str(s)
    }
}

/// Per-item failure inside a batch that otherwise succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWarning {
    /// Source node the failure belongs to
    pub node_id: NodeId,
    pub stage: CopyStage,
    pub message: String,
}

impl BatchWarning {
    pub fn new(node_id: NodeId, stage: CopyStage, error: &ScriptflowError) -> Self {
        Self {
            node_id,
            stage,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for BatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.node_id, self.stage, self.message)
    }
}

/// Outcome of a deep copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOutcome {
    /// Every source id mapped to its copy id, including failed members
    pub id_map: BTreeMap<NodeId, NodeId>,
    /// Copy ids whose node row was written
    pub created: Vec<NodeId>,
    pub warnings: Vec<BatchWarning>,
}

impl CopyOutcome {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Whether the copy of `source` was written
    pub fn copied(&self, source: &NodeId) -> bool {
        self.id_map
            .get(source)
            .is_some_and(|target| self.created.contains(target))
    }
}

/// Result of forking nodes into the caller's sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkResult {
    pub id_map: BTreeMap<NodeId, NodeId>,
    pub warnings: Vec<BatchWarning>,
}

/// Result of promoting community nodes into the official flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoteResult {
    /// New official node ids that were written
    pub official_ids: Vec<NodeId>,
    pub id_map: BTreeMap<NodeId, NodeId>,
    pub warnings: Vec<BatchWarning>,
}

/// Result of a completed restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub snapshot_id: SnapshotId,
    /// Official nodes present before the restore
    pub replaced: usize,
    /// Nodes written from the snapshot
    pub restored: usize,
    /// Edges elsewhere dropped because their target is gone
    pub inbound_edges_removed: usize,
}

/// Result of deleting a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub node_id: NodeId,
    /// Edges of other nodes that pointed at the deleted node
    pub inbound_edges_removed: usize,
}
