//! In-memory implementation of [`GraphBackend`].
//!
//! Used for tests and ephemeral runs. Individual calls can be made to fail
//! through [`FaultPoint`]s so multi-step operations can be interrupted at a
//! chosen row.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use scriptflow_core::error::{Result, ScriptflowError};
use scriptflow_core::id::{NodeId, ProductId, SnapshotId, UserId};
use scriptflow_core::traits::GraphBackend;
use scriptflow_core::types::*;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A backend call that can be made to fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    InsertNode(NodeId),
    UpsertNode(NodeId),
    ReplaceSatellite(NodeId, SatelliteKind),
    ReplaceResponses(NodeId),
    DeleteNodes,
    DeleteSatellites(SatelliteKind),
    DeleteResponsesFrom,
    DeleteResponsesTargeting,
    InsertSnapshot,
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: HashMap<NodeId, ScriptNode>,
    satellites: HashMap<(NodeId, SatelliteKind), Vec<String>>,
    responses: HashMap<NodeId, Vec<Response>>,
    snapshots: HashMap<SnapshotId, Snapshot>,
}

/// Graph backend keeping all rows in process memory
#[derive(Debug, Default)]
pub struct InMemoryGraphBackend {
    state: RwLock<GraphState>,
    /// Remaining failures per point; `None` fails until cleared
    faults: Mutex<HashMap<FaultPoint, Option<usize>>>,
}

impl InMemoryGraphBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call at `point` fail
    pub fn fail_once(&self, point: FaultPoint) {
        self.faults.lock().insert(point, Some(1));
    }

    /// Make every call at `point` fail until [`clear_faults`](Self::clear_faults)
    pub fn fail_always(&self, point: FaultPoint) {
        self.faults.lock().insert(point, None);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Total number of node rows
    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// Total number of response rows across all sources
    pub fn response_count(&self) -> usize {
        self.state.read().responses.values().map(Vec::len).sum()
    }

    /// Change a stored node row in place; returns whether it existed
    pub fn modify_node(&self, id: &NodeId, change: impl FnOnce(&mut ScriptNode)) -> bool {
        match self.state.write().nodes.get_mut(id) {
            Some(node) => {
                change(node);
                true
            }
            None => false,
        }
    }

    fn trip(&self, point: FaultPoint) -> Result<()> {
        let mut faults = self.faults.lock();
        let Some(remaining) = faults.get_mut(&point) else {
            return Ok(());
        };

        match remaining {
            Some(n) if *n <= 1 => {
                faults.remove(&point);
            }
            Some(n) => *n -= 1,
            None => {}
        }

        debug!("Injected fault at {:?}", point);
        Err(ScriptflowError::storage(format!("injected fault at {:?}", point)))
    }
}

#[async_trait]
impl GraphBackend for InMemoryGraphBackend {
    async fn insert_node(&self, node: &ScriptNode) -> Result<()> {
        self.trip(FaultPoint::InsertNode(node.id.clone()))?;

        let mut state = self.state.write();
        if state.nodes.contains_key(&node.id) {
            return Err(ScriptflowError::DuplicateId(node.id.to_string()));
        }
        state.nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn upsert_node(&self, node: &ScriptNode) -> Result<()> {
        self.trip(FaultPoint::UpsertNode(node.id.clone()))?;
        self.state.write().nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn get_node(&self, id: &NodeId) -> Result<Option<ScriptNode>> {
        Ok(self.state.read().nodes.get(id).cloned())
    }

    async fn node_exists(&self, id: &NodeId) -> Result<bool> {
        Ok(self.state.read().nodes.contains_key(id))
    }

    async fn list_nodes(&self, product_id: &ProductId, scope: Option<Scope>) -> Result<Vec<ScriptNode>> {
        let state = self.state.read();
        let mut nodes: Vec<ScriptNode> = state
            .nodes
            .values()
            .filter(|n| &n.product_id == product_id)
            .filter(|n| scope.is_none_or(|s| n.scope == s))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn list_owned_nodes(&self, owner: &UserId, scope: Scope) -> Result<Vec<ScriptNode>> {
        let state = self.state.read();
        let mut nodes: Vec<ScriptNode> = state
            .nodes
            .values()
            .filter(|n| n.scope == scope && n.is_owned_by(owner))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn delete_nodes(&self, ids: &[NodeId]) -> Result<usize> {
        self.trip(FaultPoint::DeleteNodes)?;

        let mut state = self.state.write();
        Ok(ids.iter().filter(|id| state.nodes.remove(*id).is_some()).count())
    }

    async fn get_satellite(&self, id: &NodeId, kind: SatelliteKind) -> Result<Vec<String>> {
        Ok(self
            .state
            .read()
            .satellites
            .get(&(id.clone(), kind))
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_satellite(&self, id: &NodeId, kind: SatelliteKind, items: &[String]) -> Result<()> {
        self.trip(FaultPoint::ReplaceSatellite(id.clone(), kind))?;

        let mut state = self.state.write();
        let key = (id.clone(), kind);
        if items.is_empty() {
            state.satellites.remove(&key);
        } else {
            state.satellites.insert(key, items.to_vec());
        }
        Ok(())
    }

    async fn delete_satellites(&self, ids: &[NodeId], kind: SatelliteKind) -> Result<()> {
        self.trip(FaultPoint::DeleteSatellites(kind))?;

        let mut state = self.state.write();
        for id in ids {
            state.satellites.remove(&(id.clone(), kind));
        }
        Ok(())
    }

    async fn get_responses(&self, source: &NodeId) -> Result<Vec<Response>> {
        Ok(self
            .state
            .read()
            .responses
            .get(source)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_responses(&self, source: &NodeId, responses: &[Response]) -> Result<()> {
        self.trip(FaultPoint::ReplaceResponses(source.clone()))?;

        let mut state = self.state.write();
        if responses.is_empty() {
            state.responses.remove(source);
        } else {
            state
                .responses
                .insert(source.clone(), normalize_sort_order(responses));
        }
        Ok(())
    }

    async fn delete_responses_from(&self, sources: &[NodeId]) -> Result<()> {
        self.trip(FaultPoint::DeleteResponsesFrom)?;

        let mut state = self.state.write();
        for source in sources {
            state.responses.remove(source);
        }
        Ok(())
    }

    async fn delete_responses_targeting(&self, targets: &[NodeId]) -> Result<usize> {
        self.trip(FaultPoint::DeleteResponsesTargeting)?;

        let targets: HashSet<&NodeId> = targets.iter().collect();
        let mut state = self.state.write();
        let mut removed = 0;

        for responses in state.responses.values_mut() {
            let before = responses.len();
            responses.retain(|r| !targets.contains(&r.next_node_id));
            if responses.len() != before {
                removed += before - responses.len();
                *responses = normalize_sort_order(responses);
            }
        }
        state.responses.retain(|_, responses| !responses.is_empty());

        Ok(removed)
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.trip(FaultPoint::InsertSnapshot)?;

        let mut state = self.state.write();
        if state.snapshots.contains_key(&snapshot.id) {
            return Err(ScriptflowError::DuplicateId(snapshot.id.clone()));
        }
        state.snapshots.insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }

    async fn get_snapshot(&self, id: &SnapshotId) -> Result<Option<Snapshot>> {
        Ok(self.state.read().snapshots.get(id).cloned())
    }

    async fn list_snapshots(&self, product_id: &ProductId) -> Result<Vec<SnapshotSummary>> {
        Ok(self
            .state
            .read()
            .snapshots
            .values()
            .filter(|s| &s.product_id == product_id)
            .map(Snapshot::summary)
            .collect())
    }

    async fn delete_snapshot(&self, id: &SnapshotId) -> Result<bool> {
        Ok(self.state.write().snapshots.remove(id).is_some())
    }
}
