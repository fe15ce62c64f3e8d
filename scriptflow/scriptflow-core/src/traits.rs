//! Persistence interface implemented by storage backends.

use crate::error::Result;
use crate::id::{NodeId, ProductId, SnapshotId, UserId};
use crate::types::*;
use async_trait::async_trait;

/// Row-level persistence for nodes, their satellite collections, outgoing
/// responses and snapshots.
///
/// Backends are not assumed to offer multi-row transactions. Every call is
/// an independent unit; callers compose them in dependency order.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Insert a node row; fails with `DuplicateId` if the id is taken
    async fn insert_node(&self, node: &ScriptNode) -> Result<()>;

    /// Insert or overwrite a node row
    async fn upsert_node(&self, node: &ScriptNode) -> Result<()>;

    /// Get a node row by id
    async fn get_node(&self, id: &NodeId) -> Result<Option<ScriptNode>>;

    /// Check whether a node row exists
    async fn node_exists(&self, id: &NodeId) -> Result<bool>;

    /// List node rows of a product, optionally restricted to one scope
    async fn list_nodes(&self, product_id: &ProductId, scope: Option<Scope>) -> Result<Vec<ScriptNode>>;

    /// List node rows owned by a user in a scope, across products
    async fn list_owned_nodes(&self, owner: &UserId, scope: Scope) -> Result<Vec<ScriptNode>>;

    /// Delete node rows only; returns the number removed
    async fn delete_nodes(&self, ids: &[NodeId]) -> Result<usize>;

    /// Read a text satellite list in `sort_order`
    async fn get_satellite(&self, id: &NodeId, kind: SatelliteKind) -> Result<Vec<String>>;

    /// Delete the node's rows of `kind`, then insert `items` with
    /// `sort_order` 0..n
    async fn replace_satellite(&self, id: &NodeId, kind: SatelliteKind, items: &[String]) -> Result<()>;

    /// Delete all rows of `kind` for the given nodes
    async fn delete_satellites(&self, ids: &[NodeId], kind: SatelliteKind) -> Result<()>;

    /// Read a node's outgoing responses in `sort_order`
    async fn get_responses(&self, source: &NodeId) -> Result<Vec<Response>>;

    /// Delete the node's outgoing responses, then insert `responses` with
    /// `sort_order` renumbered 0..n
    async fn replace_responses(&self, source: &NodeId, responses: &[Response]) -> Result<()>;

    /// Delete outgoing responses of the given source nodes
    async fn delete_responses_from(&self, sources: &[NodeId]) -> Result<()>;

    /// Delete responses anywhere whose target is in `targets`; returns the
    /// number removed
    async fn delete_responses_targeting(&self, targets: &[NodeId]) -> Result<usize>;

    /// Store a snapshot artifact
    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// Load a snapshot artifact
    async fn get_snapshot(&self, id: &SnapshotId) -> Result<Option<Snapshot>>;

    /// List snapshot summaries of a product
    async fn list_snapshots(&self, product_id: &ProductId) -> Result<Vec<SnapshotSummary>>;

    /// Delete a snapshot; returns whether it existed
    async fn delete_snapshot(&self, id: &SnapshotId) -> Result<bool>;
}
