//! Content graph engine: the operations callers invoke.
//!
//! Every operation takes the caller's identity and role, checks input and
//! capability before the first write, then delegates to the graph store,
//! the deep-copy engine, the snapshot manager or the edit lock manager.

use crate::batch::{BatchWarning, CopyStage, DeleteReport, ForkResult, PromoteResult, RestoreReport};
use crate::connection::ConnectionConfig;
use crate::copy::{CopyTarget, DeepCopyEngine, IdGenerator};
use crate::graph_store::{GraphStore, ResolvedEdges, first_failure};
use crate::locks::{EditLock, EditLockManager, LockAcquisition, LockStatistics};
use crate::scope::{self, Transition};
use crate::snapshot::SnapshotManager;
use crate::surreal::SurrealGraphBackend;
use chrono::Utc;
use scriptflow_core::caller::Caller;
use scriptflow_core::config::{BatchConfig, ScriptflowConfig};
use scriptflow_core::error::{Result, ScriptflowError};
use scriptflow_core::id::{NodeId, ProductId, SnapshotId};
use scriptflow_core::traits::GraphBackend;
use scriptflow_core::types::*;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

const OPENING_TITLE: &str = "Opening";
const OPENING_SCRIPT: &str = "Introduce yourself and the reason for your call.";

/// Lifecycle and versioning operations on the content graph
pub struct ContentGraphEngine {
    store: GraphStore,
    copier: DeepCopyEngine,
    snapshots: SnapshotManager,
    locks: EditLockManager,
    batch: BatchConfig,
}

impl ContentGraphEngine {
    pub fn new(backend: Arc<dyn GraphBackend>, config: &ScriptflowConfig) -> Self {
        let store = GraphStore::new(backend);
        Self {
            copier: DeepCopyEngine::new(store.clone(), config.copy.clone()),
            snapshots: SnapshotManager::new(store.clone()),
            locks: EditLockManager::new(config.locks.lease_duration()),
            batch: config.batch.clone(),
            store,
        }
    }

    /// Open the database named by `config.database` and build an engine on it
    pub async fn open(config: &ScriptflowConfig) -> Result<Self> {
        let connection = ConnectionConfig::from_database_config(&config.database)?;
        let backend = SurrealGraphBackend::connect(&connection).await?;
        Ok(Self::new(Arc::new(backend), config))
    }

    /// Replace the identifier source used for copies
    pub fn with_id_generator(mut self, id_generator: IdGenerator) -> Self {
        self.copier = self.copier.with_id_generator(id_generator);
        self
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn locks(&self) -> &EditLockManager {
        &self.locks
    }

    // ==========================================================================
    // Nodes
    // ==========================================================================

    /// Create a node in `scope`. Sandbox nodes belong to the caller.
    pub async fn create_node(&self, caller: &Caller, draft: NodeDraft, scope: Scope) -> Result<NodeRecord> {
        scope::authorize_create(scope, caller)?;

        if draft.product_id.trim().is_empty() {
            return Err(ScriptflowError::validation("Node requires a product"));
        }
        if draft.title.trim().is_empty() {
            return Err(ScriptflowError::validation("Node requires a title"));
        }
        let id = match draft.id {
            Some(id) if !id.is_well_formed() => {
                return Err(ScriptflowError::validation(format!("Malformed node id '{}'", id)));
            }
            Some(id) => id,
            None => NodeId::generate(),
        };
        validate_responses(&draft.responses)?;

        let owner = scope.requires_owner().then(|| caller.user_id.clone());
        let mut node = ScriptNode::new(
            id,
            draft.product_id,
            draft.node_type.unwrap_or(NodeType::Discovery),
            draft.title,
            scope,
            owner,
        );
        node.script = draft.script;
        node.context = draft.context;
        node.metadata = draft.metadata;
        node.position = draft.position;
        node.topic_group_id = draft.topic_group_id;
        node.created_by = Some(caller.user_id.clone());
        node.updated_by = Some(caller.user_id.clone());

        let record = NodeRecord {
            node,
            key_points: draft.key_points,
            warnings: draft.warnings,
            listen_for: draft.listen_for,
            responses: normalize_sort_order(&draft.responses),
        };

        let failures = self.store.insert_record(&record).await?;
        first_failure(failures)?;

        info!("Node {} created in {} by {}", record.id(), scope, caller.user_id);
        Ok(record)
    }

    /// Give a product its default official opening node.
    ///
    /// Returns the existing opening node when there is one. A product that
    /// already has official nodes but no opening node is left alone.
    pub async fn seed_product(&self, caller: &Caller, product_id: &ProductId) -> Result<ScriptNode> {
        require_admin(caller, "seeding a product")?;
        if product_id.trim().is_empty() {
            return Err(ScriptflowError::validation("Product id is empty"));
        }

        let official = self.store.list(product_id, Scope::Official).await?;
        if let Some(opening) = official.iter().find(|n| n.node_type == NodeType::Opening) {
            return Ok(opening.clone());
        }
        if !official.is_empty() {
            return Err(ScriptflowError::validation(format!(
                "Product {} already has {} official nodes",
                product_id,
                official.len()
            )));
        }

        let draft = NodeDraft {
            product_id: product_id.clone(),
            node_type: Some(NodeType::Opening),
            title: OPENING_TITLE.to_string(),
            script: OPENING_SCRIPT.to_string(),
            ..Default::default()
        };
        let record = self.create_node(caller, draft, Scope::Official).await?;
        Ok(record.node)
    }

    /// Load a node the caller can see, with satellites and edges
    pub async fn get_node(&self, caller: &Caller, id: &NodeId) -> Result<NodeRecord> {
        let node = self.visible_node(caller, id).await?;
        self.store.complete_record(node).await
    }

    /// List a product's nodes in one scope; sandbox lists only the caller's
    pub async fn list_nodes(&self, caller: &Caller, product_id: &ProductId, scope: Scope) -> Result<Vec<ScriptNode>> {
        match scope {
            Scope::Sandbox => {
                self.store
                    .list_owned(product_id, &caller.user_id, Scope::Sandbox)
                    .await
            }
            _ => self.store.list(product_id, scope).await,
        }
    }

    /// Split a node's outgoing edges into live and dangling targets
    pub async fn resolve_edges(&self, caller: &Caller, id: &NodeId) -> Result<ResolvedEdges> {
        self.visible_node(caller, id).await?;
        self.store.resolve_edges(id).await
    }

    /// Apply a field delta to a node
    pub async fn edit_node(&self, caller: &Caller, id: &NodeId, update: NodeUpdate) -> Result<NodeRecord> {
        let node = self.visible_node(caller, id).await?;
        scope::authorize(Transition::Edit, &node, caller)?;

        if update.is_empty() {
            return Err(ScriptflowError::validation("Update contains no fields"));
        }
        if update.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ScriptflowError::validation("Title cannot be empty"));
        }
        if let Some(responses) = &update.responses {
            validate_responses(responses)?;
        }
        self.locks.ensure_editable(id, &caller.user_id)?;

        let (node, failures) = self.store.update(id, &update, &caller.user_id).await?;
        first_failure(failures)?;

        self.store.complete_record(node).await
    }

    /// Delete a node, its satellites, its edges and every edge targeting it
    pub async fn delete_node(&self, caller: &Caller, id: &NodeId) -> Result<DeleteReport> {
        let node = self.visible_node(caller, id).await?;
        scope::authorize(Transition::Delete, &node, caller)?;

        let summary = self.store.delete_many(std::slice::from_ref(id)).await?;
        self.locks.forget(id);

        info!(
            "Node {} deleted by {} ({} inbound edges removed)",
            id, caller.user_id, summary.inbound_edges_removed
        );
        Ok(DeleteReport {
            node_id: id.clone(),
            inbound_edges_removed: summary.inbound_edges_removed,
        })
    }

    // ==========================================================================
    // Scope transitions
    // ==========================================================================

    /// Copy official or community nodes into the caller's sandbox
    pub async fn fork(&self, caller: &Caller, ids: &[NodeId]) -> Result<ForkResult> {
        self.validate_ids(ids)?;

        let mut sources = Vec::with_capacity(ids.len());
        for id in ids {
            let node = self.visible_node(caller, id).await?;
            scope::authorize(Transition::Fork, &node, caller)?;
            sources.push(self.store.complete_record(node).await?);
        }

        let outcome = self
            .copier
            .copy(&sources, &CopyTarget::sandbox(caller.user_id.clone()))
            .await?;

        info!(
            "{} forked {} nodes ({} warnings)",
            caller.user_id,
            outcome.created.len(),
            outcome.warnings.len()
        );
        Ok(ForkResult {
            id_map: outcome.id_map,
            warnings: outcome.warnings,
        })
    }

    /// Copy community nodes into the official flow and move the originals
    /// back to their owners' sandboxes
    pub async fn promote(&self, caller: &Caller, ids: &[NodeId]) -> Result<PromoteResult> {
        require_admin(caller, "promote")?;
        self.validate_ids(ids)?;

        let mut sources = Vec::with_capacity(ids.len());
        for id in ids {
            let node = self.store.get(id).await?;
            scope::authorize(Transition::Promote, &node, caller)?;
            sources.push(self.store.complete_record(node).await?);
        }

        let outcome = self
            .copier
            .copy(&sources, &CopyTarget::official(caller.user_id.clone()))
            .await?;
        let mut warnings = outcome.warnings.clone();

        for record in &sources {
            if !outcome.copied(record.id()) {
                continue;
            }
            // Re-read so edits made while copying survive the revert
            let reverted = match self.store.get(record.id()).await {
                Ok(mut original) => {
                    original.scope = Scope::Sandbox;
                    original.published_at = None;
                    self.store.save_node(&mut original, &caller.user_id).await
                }
                Err(e) => Err(e),
            };

            if let Err(e) = reverted {
                warn!("Promoted {} but could not unpublish the original: {}", record.id(), e);
                warnings.push(BatchWarning::new(record.id().clone(), CopyStage::RevertOriginal, &e));
            }
        }

        let official_ids = sources
            .iter()
            .filter(|r| outcome.copied(r.id()))
            .filter_map(|r| outcome.id_map.get(r.id()).cloned())
            .collect::<Vec<_>>();

        info!(
            "{} promoted {} nodes ({} warnings)",
            caller.user_id,
            official_ids.len(),
            warnings.len()
        );
        Ok(PromoteResult {
            official_ids,
            id_map: outcome.id_map,
            warnings,
        })
    }

    /// Make a sandbox node visible in the community catalogue
    pub async fn publish(&self, caller: &Caller, id: &NodeId) -> Result<ScriptNode> {
        let mut node = self.visible_node(caller, id).await?;
        scope::authorize(Transition::Publish, &node, caller)?;

        node.scope = Scope::Community;
        node.published_at = Some(Utc::now());
        self.store.save_node(&mut node, &caller.user_id).await?;

        info!("Node {} published by {}", id, caller.user_id);
        Ok(node)
    }

    /// Take a community node back into its owner's sandbox
    pub async fn unpublish(&self, caller: &Caller, id: &NodeId) -> Result<ScriptNode> {
        let mut node = self.visible_node(caller, id).await?;
        scope::authorize(Transition::Unpublish, &node, caller)?;

        node.scope = Scope::Sandbox;
        node.published_at = None;
        self.store.save_node(&mut node, &caller.user_id).await?;

        info!("Node {} unpublished by {}", id, caller.user_id);
        Ok(node)
    }

    // ==========================================================================
    // Snapshots
    // ==========================================================================

    pub async fn capture_snapshot(&self, caller: &Caller, product_id: &ProductId, label: &str) -> Result<SnapshotSummary> {
        require_admin(caller, "capturing a snapshot")?;
        if product_id.trim().is_empty() {
            return Err(ScriptflowError::validation("Product id is empty"));
        }
        if label.trim().is_empty() {
            return Err(ScriptflowError::validation("Snapshot label is empty"));
        }

        let snapshot = self
            .snapshots
            .capture(product_id, label.trim(), &caller.user_id)
            .await?;
        Ok(snapshot.summary())
    }

    pub async fn restore_snapshot(&self, caller: &Caller, snapshot_id: &SnapshotId) -> Result<RestoreReport> {
        require_admin(caller, "restoring a snapshot")?;
        self.snapshots.restore(snapshot_id).await
    }

    pub async fn list_snapshots(&self, caller: &Caller, product_id: &ProductId) -> Result<Vec<SnapshotSummary>> {
        require_admin(caller, "listing snapshots")?;
        self.snapshots.list(product_id).await
    }

    pub async fn get_snapshot(&self, caller: &Caller, snapshot_id: &SnapshotId) -> Result<Snapshot> {
        require_admin(caller, "reading a snapshot")?;
        self.snapshots.get(snapshot_id).await
    }

    pub async fn delete_snapshot(&self, caller: &Caller, snapshot_id: &SnapshotId) -> Result<()> {
        require_admin(caller, "deleting a snapshot")?;
        self.snapshots.delete(snapshot_id).await
    }

    // ==========================================================================
    // Edit locks
    // ==========================================================================

    /// Acquire or renew the caller's edit lease on a node
    pub async fn acquire_lock(&self, caller: &Caller, id: &NodeId) -> Result<LockAcquisition> {
        self.visible_node(caller, id).await?;
        Ok(self.locks.acquire(id, &caller.user_id))
    }

    /// Release the caller's lease; a no-op if the caller does not hold it
    pub fn release_lock(&self, caller: &Caller, id: &NodeId) -> bool {
        self.locks.release(id, &caller.user_id)
    }

    pub fn lock_status(&self, id: &NodeId) -> Option<EditLock> {
        self.locks.status(id)
    }

    /// Unexpired leases; lapsed ones are dropped on the way
    pub fn list_locks(&self) -> Vec<EditLock> {
        self.locks.purge_expired(Utc::now());
        self.locks.active_locks()
    }

    pub fn lock_statistics(&self) -> LockStatistics {
        self.locks.statistics()
    }

    // ==========================================================================
    // Helpers
    // ==========================================================================

    /// Get a node, hiding other users' sandbox nodes as not found
    async fn visible_node(&self, caller: &Caller, id: &NodeId) -> Result<ScriptNode> {
        let node = self.store.get(id).await?;
        if !scope::can_view(&node, caller) {
            return Err(ScriptflowError::not_found("node", id.as_str()));
        }
        Ok(node)
    }

    fn validate_ids(&self, ids: &[NodeId]) -> Result<()> {
        if ids.is_empty() {
            return Err(ScriptflowError::validation("No node ids given"));
        }
        if ids.len() > self.batch.max_items {
            return Err(ScriptflowError::validation(format!(
                "Too many node ids: {} (limit {})",
                ids.len(),
                self.batch.max_items
            )));
        }

        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids {
            if !id.is_well_formed() {
                return Err(ScriptflowError::validation(format!("Malformed node id '{}'", id)));
            }
            if !seen.insert(id) {
                return Err(ScriptflowError::validation(format!("Node id {} given twice", id)));
            }
        }
        Ok(())
    }
}

/// Every edge needs a label and a well-formed target
fn validate_responses(responses: &[Response]) -> Result<()> {
    for response in responses {
        if response.label.trim().is_empty() {
            return Err(ScriptflowError::validation(format!(
                "Response to '{}' has no label",
                response.next_node_id
            )));
        }
        if !response.next_node_id.is_well_formed() {
            return Err(ScriptflowError::validation(format!(
                "Response '{}' has malformed target '{}'",
                response.label, response.next_node_id
            )));
        }
    }
    Ok(())
}

fn require_admin(caller: &Caller, action: &str) -> Result<()> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(ScriptflowError::unauthorized(format!(
            "{} requires administrator role",
            action
        )))
    }
}
