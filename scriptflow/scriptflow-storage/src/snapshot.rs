//! Snapshot manager: capture and restore of a product's official subgraph.
//!
//! Restore is a fixed sequence of independent writes (see
//! [`RestoreStage`]). It is not atomic: a failing stage stops the restore
//! and is reported as [`ScriptflowError::RestoreInterrupted`] with the stages
//! already completed. Every run starts by clearing whatever is official at
//! that moment, so re-running the same restore converges on the snapshot
//! contents.

use crate::batch::RestoreReport;
use crate::graph_store::GraphStore;
use chrono::Utc;
use scriptflow_core::error::{RestoreStage, Result, ScriptflowError};
use scriptflow_core::id::{NodeId, ProductId, SnapshotId, UserId, new_snapshot_id};
use scriptflow_core::types::*;
use std::collections::HashSet;
use tracing::{debug, error, info};

pub struct SnapshotManager {
    store: GraphStore,
}

impl SnapshotManager {
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    /// Capture every official node of `product_id` with satellites and edges
    pub async fn capture(&self, product_id: &ProductId, label: &str, created_by: &UserId) -> Result<Snapshot> {
        let nodes = self.store.list_records(product_id, Scope::Official).await?;

        let snapshot = Snapshot {
            id: new_snapshot_id(),
            product_id: product_id.clone(),
            label: label.to_string(),
            created_by: created_by.clone(),
            created_at: Utc::now(),
            nodes,
        };
        self.store.backend().insert_snapshot(&snapshot).await?;

        info!(
            "Captured snapshot {} '{}' of product {} ({} nodes)",
            snapshot.id,
            snapshot.label,
            product_id,
            snapshot.nodes.len()
        );
        Ok(snapshot)
    }

    /// Snapshot summaries of a product, newest first
    pub async fn list(&self, product_id: &ProductId) -> Result<Vec<SnapshotSummary>> {
        let mut summaries = self.store.backend().list_snapshots(product_id).await?;
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    pub async fn get(&self, snapshot_id: &SnapshotId) -> Result<Snapshot> {
        self.store
            .backend()
            .get_snapshot(snapshot_id)
            .await?
            .ok_or_else(|| ScriptflowError::not_found("snapshot", snapshot_id.as_str()))
    }

    pub async fn delete(&self, snapshot_id: &SnapshotId) -> Result<()> {
        if !self.store.backend().delete_snapshot(snapshot_id).await? {
            return Err(ScriptflowError::not_found("snapshot", snapshot_id.as_str()));
        }
        info!("Deleted snapshot {}", snapshot_id);
        Ok(())
    }

    /// Replace the official subgraph of the snapshot's product with the
    /// snapshot contents.
    ///
    /// Edges elsewhere that target an official node the snapshot does not
    /// bring back are removed. Edges targeting nodes that are restored are
    /// kept, since their target exists again afterwards.
    pub async fn restore(&self, snapshot_id: &SnapshotId) -> Result<RestoreReport> {
        let snapshot = match self.store.backend().get_snapshot(snapshot_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Err(ScriptflowError::not_found("snapshot", snapshot_id.as_str())),
            Err(e) => return Err(self.interrupted(snapshot_id, RestoreStage::LoadSnapshot, e)),
        };
        self.validate(&snapshot)?;

        let product_id = &snapshot.product_id;
        let current: Vec<NodeId> = self
            .store
            .list(product_id, Scope::Official)
            .await
            .map_err(|e| self.interrupted(snapshot_id, RestoreStage::LoadSnapshot, e))?
            .into_iter()
            .map(|n| n.id)
            .collect();

        let restored_ids: HashSet<&NodeId> = snapshot.nodes.iter().map(|r| r.id()).collect();
        let current_set: HashSet<&NodeId> = current.iter().collect();
        let vanishing: Vec<NodeId> = current
            .iter()
            .filter(|id| !restored_ids.contains(id))
            .cloned()
            .collect();

        for record in &snapshot.nodes {
            if current_set.contains(record.id()) {
                continue;
            }
            if self.store.backend().node_exists(record.id()).await? {
                return Err(ScriptflowError::DuplicateId(format!(
                    "{} is in use outside the official scope of product {}",
                    record.id(),
                    product_id
                )));
            }
        }

        debug!(
            "Restoring snapshot {}: replacing {} official nodes with {}",
            snapshot_id,
            current.len(),
            snapshot.nodes.len()
        );

        let backend = self.store.backend();

        let inbound_edges_removed = backend
            .delete_responses_targeting(&vanishing)
            .await
            .map_err(|e| self.interrupted(snapshot_id, RestoreStage::ClearInboundEdges, e))?;

        backend
            .delete_responses_from(&current)
            .await
            .map_err(|e| self.interrupted(snapshot_id, RestoreStage::ClearOutgoingEdges, e))?;

        for kind in SatelliteKind::ALL {
            backend
                .delete_satellites(&current, kind)
                .await
                .map_err(|e| self.interrupted(snapshot_id, RestoreStage::ClearSatellites, e))?;
        }

        backend
            .delete_nodes(&current)
            .await
            .map_err(|e| self.interrupted(snapshot_id, RestoreStage::ClearNodes, e))?;

        for record in &snapshot.nodes {
            backend
                .upsert_node(&record.node)
                .await
                .map_err(|e| self.interrupted(snapshot_id, RestoreStage::InsertNodes, e))?;
        }

        for record in &snapshot.nodes {
            for kind in SatelliteKind::ALL {
                let items = record.satellite(kind);
                if items.is_empty() {
                    continue;
                }
                backend
                    .replace_satellite(record.id(), kind, items)
                    .await
                    .map_err(|e| self.interrupted(snapshot_id, RestoreStage::InsertSatellites, e))?;
            }
        }

        for record in &snapshot.nodes {
            if record.responses.is_empty() {
                continue;
            }
            backend
                .replace_responses(record.id(), &record.responses)
                .await
                .map_err(|e| self.interrupted(snapshot_id, RestoreStage::InsertEdges, e))?;
        }

        info!(
            "Restored snapshot {} of product {}: {} nodes replaced by {}",
            snapshot_id,
            product_id,
            current.len(),
            snapshot.nodes.len()
        );

        Ok(RestoreReport {
            snapshot_id: snapshot_id.clone(),
            replaced: current.len(),
            restored: snapshot.nodes.len(),
            inbound_edges_removed,
        })
    }

    /// Reject artifacts that would write outside their product's official scope
    fn validate(&self, snapshot: &Snapshot) -> Result<()> {
        if snapshot.product_id.trim().is_empty() {
            return Err(ScriptflowError::validation(format!(
                "Snapshot {} has no owning product",
                snapshot.id
            )));
        }

        let mut seen = HashSet::new();
        for record in &snapshot.nodes {
            let node = &record.node;
            if node.product_id != snapshot.product_id || node.scope != Scope::Official {
                return Err(ScriptflowError::validation(format!(
                    "Snapshot {} contains node {} outside the official scope of product {}",
                    snapshot.id, node.id, snapshot.product_id
                )));
            }
            if !seen.insert(&node.id) {
                return Err(ScriptflowError::validation(format!(
                    "Snapshot {} contains node {} twice",
                    snapshot.id, node.id
                )));
            }
        }
        Ok(())
    }

    fn interrupted(&self, snapshot_id: &SnapshotId, stage: RestoreStage, cause: ScriptflowError) -> ScriptflowError {
        error!(
            "Restore of snapshot {} interrupted during {}: {}",
            snapshot_id, stage, cause
        );
        ScriptflowError::restore_interrupted(snapshot_id.as_str(), stage, &cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FaultPoint, InMemoryGraphBackend};
    use scriptflow_core::traits::GraphBackend;
    use std::sync::Arc;

    fn setup() -> (Arc<InMemoryGraphBackend>, GraphStore, SnapshotManager) {
        let backend = Arc::new(InMemoryGraphBackend::new());
        let store = GraphStore::new(backend.clone());
        (backend, store.clone(), SnapshotManager::new(store))
    }

    async fn seed(store: &GraphStore, id: &str, targets: &[&str]) {
        let node = ScriptNode::new(id.into(), "p1", NodeType::Pitch, id, Scope::Official, None);
        let mut record = NodeRecord::new(node);
        record.warnings = vec![format!("careful with {id}")];
        record.responses = targets.iter().map(|t| Response::new("next", *t)).collect();
        store.insert_record(&record).await.unwrap();
    }

    #[tokio::test]
    async fn test_capture_records_official_nodes_only() {
        let (_, store, snapshots) = setup();
        seed(&store, "n1", &["n2"]).await;
        seed(&store, "n2", &[]).await;
        let sandbox = ScriptNode::new(
            "s1".into(),
            "p1",
            NodeType::Pitch,
            "mine",
            Scope::Sandbox,
            Some("alice".into()),
        );
        store.insert_record(&NodeRecord::new(sandbox)).await.unwrap();

        let snapshot = snapshots
            .capture(&"p1".to_string(), "before launch", &"root".to_string())
            .await
            .unwrap();
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.nodes[0].responses.len(), 1);

        let listed = snapshots.list(&"p1".to_string()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].node_count, 2);
    }

    #[tokio::test]
    async fn test_restore_reports_stage_on_failure_and_converges_on_retry() {
        let (backend, store, snapshots) = setup();
        seed(&store, "n1", &["n2"]).await;
        seed(&store, "n2", &[]).await;
        let snapshot = snapshots
            .capture(&"p1".to_string(), "v1", &"root".to_string())
            .await
            .unwrap();

        store.delete_many(&["n2".into()]).await.unwrap();
        backend.fail_once(FaultPoint::UpsertNode("n2".into()));

        let err = snapshots.restore(&snapshot.id).await.unwrap_err();
        match &err {
            ScriptflowError::RestoreInterrupted {
                stage,
                completed_stages,
                ..
            } => {
                assert_eq!(*stage, RestoreStage::InsertNodes);
                assert!(completed_stages.contains(&RestoreStage::ClearNodes));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let report = snapshots.restore(&snapshot.id).await.unwrap();
        assert_eq!(report.restored, 2);

        let n1 = store.load_record(&"n1".into()).await.unwrap();
        assert_eq!(n1.responses[0].next_node_id, "n2");
        assert_eq!(n1.warnings, vec!["careful with n1"]);
        assert!(backend.node_exists(&"n2".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_unknown_snapshot() {
        let (_, _, snapshots) = setup();
        let err = snapshots.restore(&"missing".to_string()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_restore_rejects_foreign_nodes() {
        let (backend, _, snapshots) = setup();
        let stray = ScriptNode::new("x".into(), "p2", NodeType::End, "x", Scope::Official, None);
        let snapshot = Snapshot {
            id: "s1".into(),
            product_id: "p1".into(),
            label: "tampered".into(),
            created_by: "root".into(),
            created_at: Utc::now(),
            nodes: vec![NodeRecord::new(stray)],
        };
        backend.insert_snapshot(&snapshot).await.unwrap();

        let err = snapshots.restore(&"s1".to_string()).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(backend.node_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_snapshot() {
        let (_, _, snapshots) = setup();
        let snapshot = snapshots
            .capture(&"p1".to_string(), "empty", &"root".to_string())
            .await
            .unwrap();

        snapshots.delete(&snapshot.id).await.unwrap();
        assert!(snapshots.get(&snapshot.id).await.unwrap_err().is_not_found());
        assert!(snapshots.delete(&snapshot.id).await.unwrap_err().is_not_found());
    }
}
