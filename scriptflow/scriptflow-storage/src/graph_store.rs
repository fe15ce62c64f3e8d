//! Graph Store: node records and their satellite collections.
//!
//! Composes the row primitives of a [`GraphBackend`] into record-level
//! operations. Satellite collections are written with replace semantics and
//! independently of one another: a failing collection is reported as a
//! [`ScriptflowError::SatelliteWrite`] while the remaining ones are still
//! attempted. Bulk deletion removes inbound edges, outgoing edges and
//! satellites before the node rows.

use chrono::Utc;
use futures::future::try_join_all;
use scriptflow_core::error::{Result, ScriptflowError};
use scriptflow_core::id::{NodeId, ProductId, UserId};
use scriptflow_core::traits::GraphBackend;
use scriptflow_core::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Counts reported by a bulk delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSummary {
    pub nodes_removed: usize,
    pub inbound_edges_removed: usize,
}

/// Outgoing edges of a node split by whether their target exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEdges {
    pub live: Vec<Response>,
    pub dangling: Vec<Response>,
}

/// Record-level access to the content graph
#[derive(Clone)]
pub struct GraphStore {
    backend: Arc<dyn GraphBackend>,
}

impl GraphStore {
    pub fn new(backend: Arc<dyn GraphBackend>) -> Self {
        Self { backend }
    }

    /// Access the row-level backend
    pub fn backend(&self) -> &Arc<dyn GraphBackend> {
        &self.backend
    }

    /// Insert a new node and its collections.
    ///
    /// Fails if the node row cannot be written. Collection failures are
    /// returned for the caller to report.
    pub async fn insert_record(&self, record: &NodeRecord) -> Result<Vec<ScriptflowError>> {
        self.backend.insert_node(&record.node).await?;
        debug!("Created node {} ({})", record.node.id, record.node.scope);

        let satellites: Vec<(SatelliteKind, &[String])> = SatelliteKind::ALL
            .iter()
            .map(|kind| (*kind, record.satellite(*kind)))
            .filter(|(_, items)| !items.is_empty())
            .collect();
        let responses = (!record.responses.is_empty()).then_some(record.responses.as_slice());

        Ok(self
            .replace_collections(record.id(), &satellites, responses)
            .await)
    }

    /// Replace the given collections of a node, each independently
    pub async fn replace_collections(
        &self,
        id: &NodeId,
        satellites: &[(SatelliteKind, &[String])],
        responses: Option<&[Response]>,
    ) -> Vec<ScriptflowError> {
        let mut failures = Vec::new();

        for (kind, items) in satellites {
            if let Err(e) = self.backend.replace_satellite(id, *kind, items).await {
                warn!("Failed to write {} for node {}: {}", kind, id, e);
                failures.push(ScriptflowError::satellite_write(
                    id.as_str(),
                    Collection::Satellite(*kind),
                    e,
                ));
            }
        }

        if let Some(responses) = responses {
            if let Err(e) = self.backend.replace_responses(id, responses).await {
                warn!("Failed to write responses for node {}: {}", id, e);
                failures.push(ScriptflowError::satellite_write(
                    id.as_str(),
                    Collection::Responses,
                    e,
                ));
            }
        }

        failures
    }

    /// Get a node row
    pub async fn get(&self, id: &NodeId) -> Result<ScriptNode> {
        self.backend
            .get_node(id)
            .await?
            .ok_or_else(|| ScriptflowError::not_found("node", id.as_str()))
    }

    /// Get a node with all satellites and outgoing edges
    pub async fn load_record(&self, id: &NodeId) -> Result<NodeRecord> {
        let node = self.get(id).await?;
        self.complete_record(node).await
    }

    /// Attach satellites and outgoing edges to a node row
    pub async fn complete_record(&self, node: ScriptNode) -> Result<NodeRecord> {
        let mut record = NodeRecord::new(node);
        for kind in SatelliteKind::ALL {
            *record.satellite_mut(kind) = self.backend.get_satellite(&record.node.id, kind).await?;
        }
        record.responses = self.backend.get_responses(&record.node.id).await?;
        Ok(record)
    }

    /// List node rows of a product in one scope
    pub async fn list(&self, product_id: &ProductId, scope: Scope) -> Result<Vec<ScriptNode>> {
        self.backend.list_nodes(product_id, Some(scope)).await
    }

    /// List full records of a product in one scope
    pub async fn list_records(&self, product_id: &ProductId, scope: Scope) -> Result<Vec<NodeRecord>> {
        let nodes = self.list(product_id, scope).await?;
        try_join_all(nodes.into_iter().map(|node| self.complete_record(node))).await
    }

    /// List sandbox or community nodes of `owner` within a product
    pub async fn list_owned(&self, product_id: &ProductId, owner: &UserId, scope: Scope) -> Result<Vec<ScriptNode>> {
        let nodes = self.backend.list_owned_nodes(owner, scope).await?;
        Ok(nodes
            .into_iter()
            .filter(|n| &n.product_id == product_id)
            .collect())
    }

    /// Persist a node row, stamping the editor
    pub async fn save_node(&self, node: &mut ScriptNode, editor: &UserId) -> Result<()> {
        node.updated_by = Some(editor.clone());
        node.updated_at = Utc::now();
        self.backend.upsert_node(node).await
    }

    /// Apply a partial update.
    ///
    /// Supplied fields are written to the node row; supplied collections
    /// replace the stored ones, omitted collections are left untouched.
    pub async fn update(
        &self,
        id: &NodeId,
        update: &NodeUpdate,
        editor: &UserId,
    ) -> Result<(ScriptNode, Vec<ScriptflowError>)> {
        let mut node = self.get(id).await?;
        update.apply_fields(&mut node);
        self.save_node(&mut node, editor).await?;

        let satellites: Vec<(SatelliteKind, &[String])> = SatelliteKind::ALL
            .iter()
            .filter_map(|kind| update.satellite(*kind).map(|items| (*kind, items.as_slice())))
            .collect();
        let failures = self
            .replace_collections(id, &satellites, update.responses.as_deref())
            .await;

        Ok((node, failures))
    }

    /// Delete nodes with everything that references them.
    ///
    /// Edges targeting the nodes go first, then their outgoing edges, then
    /// each satellite kind, then the node rows.
    pub async fn delete_many(&self, ids: &[NodeId]) -> Result<DeleteSummary> {
        if ids.is_empty() {
            return Ok(DeleteSummary::default());
        }

        let inbound_edges_removed = self.backend.delete_responses_targeting(ids).await?;
        self.backend.delete_responses_from(ids).await?;
        for kind in SatelliteKind::ALL {
            self.backend.delete_satellites(ids, kind).await?;
        }
        let nodes_removed = self.backend.delete_nodes(ids).await?;

        debug!(
            "Deleted {} nodes and {} inbound edges",
            nodes_removed, inbound_edges_removed
        );
        Ok(DeleteSummary {
            nodes_removed,
            inbound_edges_removed,
        })
    }

    /// Split a node's outgoing edges into live and dangling targets
    pub async fn resolve_edges(&self, id: &NodeId) -> Result<ResolvedEdges> {
        let responses = self.backend.get_responses(id).await?;
        let mut resolved = ResolvedEdges::default();
        let mut live_targets = HashSet::new();

        for response in responses {
            let live = live_targets.contains(&response.next_node_id)
                || self.backend.node_exists(&response.next_node_id).await?;
            if live {
                live_targets.insert(response.next_node_id.clone());
                resolved.live.push(response);
            } else {
                resolved.dangling.push(response);
            }
        }

        Ok(resolved)
    }
}

/// Collapse collection failures into the first one
pub(crate) fn first_failure(failures: Vec<ScriptflowError>) -> Result<()> {
    match failures.into_iter().next() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
