//! Deep-copy engine used by fork and promote.
//!
//! A copy runs in three phases:
//!
//! 1. Draw a fresh identifier for every source before anything is written.
//! 2. Write each copied node row with its satellite lists.
//! 3. Write each copy's outgoing edges, with targets inside the batch
//!    remapped to their copies and targets outside left untouched.
//!
//! Members are independent once the identifier map exists: a failing member
//! is reported as a [`BatchWarning`] and the rest of the batch proceeds.

use crate::batch::{BatchWarning, CopyOutcome, CopyStage};
use crate::graph_store::GraphStore;
use chrono::Utc;
use scriptflow_core::config::CopyConfig;
use scriptflow_core::error::{Result, ScriptflowError};
use scriptflow_core::id::{NodeId, UserId};
use scriptflow_core::types::*;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Source of candidate identifiers for copies
pub type IdGenerator = Arc<dyn Fn() -> NodeId + Send + Sync>;

/// Where copies land and who they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTarget {
    pub scope: Scope,
    /// Owner of every copy; `None` for official copies
    pub owner: Option<UserId>,
    /// Recorded as creator of the copies
    pub actor: UserId,
}

impl CopyTarget {
    /// Copies into the sandbox of `user`
    pub fn sandbox(user: impl Into<UserId>) -> Self {
        let user = user.into();
        Self {
            scope: Scope::Sandbox,
            owner: Some(user.clone()),
            actor: user,
        }
    }

    /// Unowned official copies created by `admin`
    pub fn official(admin: impl Into<UserId>) -> Self {
        Self {
            scope: Scope::Official,
            owner: None,
            actor: admin.into(),
        }
    }
}

/// Remap edge targets through `id_map`.
///
/// Targets that are keys of the map point at their copy afterwards; all
/// other targets are kept as they are.
pub fn remap_responses(responses: &[Response], id_map: &BTreeMap<NodeId, NodeId>) -> Vec<Response> {
    responses
        .iter()
        .map(|r| Response {
            next_node_id: id_map
                .get(&r.next_node_id)
                .cloned()
                .unwrap_or_else(|| r.next_node_id.clone()),
            ..r.clone()
        })
        .collect()
}

/// Copies sets of node records under fresh identifiers
pub struct DeepCopyEngine {
    store: GraphStore,
    config: CopyConfig,
    id_generator: IdGenerator,
}

impl DeepCopyEngine {
    pub fn new(store: GraphStore, config: CopyConfig) -> Self {
        Self {
            store,
            config,
            id_generator: Arc::new(NodeId::generate),
        }
    }

    /// Replace the identifier source
    pub fn with_id_generator(mut self, id_generator: IdGenerator) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// Draw a copy identifier for every source.
    ///
    /// Candidates that already exist in the store, or were already drawn for
    /// this batch, are discarded. Fails with `DuplicateId` when no free
    /// identifier turns up within the configured number of attempts.
    pub async fn plan_ids(&self, sources: &[NodeId]) -> Result<BTreeMap<NodeId, NodeId>> {
        let mut id_map = BTreeMap::new();
        let mut drawn: HashSet<NodeId> = HashSet::new();
        let attempts = self.config.max_id_attempts.max(1);

        for source in sources {
            let mut chosen = None;
            let mut last = None;

            for _ in 0..attempts {
                let candidate = (self.id_generator)();
                if drawn.contains(&candidate)
                    || sources.contains(&candidate)
                    || self.store.backend().node_exists(&candidate).await?
                {
                    debug!("Discarding colliding identifier {}", candidate);
                    last = Some(candidate);
                    continue;
                }
                chosen = Some(candidate);
                break;
            }

            let Some(target) = chosen else {
                let candidate = last.map(NodeId::into_inner).unwrap_or_default();
                return Err(ScriptflowError::DuplicateId(format!(
                    "{} (no free identifier for copy of {} after {} attempts)",
                    candidate, source, attempts
                )));
            };

            drawn.insert(target.clone());
            id_map.insert(source.clone(), target);
        }

        Ok(id_map)
    }

    /// Copy `sources` into `target`.
    ///
    /// The identifier map covers every source even when its copy fails, so
    /// edges from other copies to a failed member point at the identifier it
    /// would have had.
    pub async fn copy(&self, sources: &[NodeRecord], target: &CopyTarget) -> Result<CopyOutcome> {
        let source_ids: Vec<NodeId> = sources.iter().map(|r| r.id().clone()).collect();
        let id_map = self.plan_ids(&source_ids).await?;

        let mut outcome = CopyOutcome {
            id_map,
            ..Default::default()
        };
        let mut written: Vec<&NodeRecord> = Vec::with_capacity(sources.len());

        for record in sources {
            let Some(new_id) = outcome.id_map.get(record.id()).cloned() else {
                continue;
            };
            let copy = self.copy_node(&record.node, new_id.clone(), target);

            if let Err(e) = self.store.backend().insert_node(&copy).await {
                warn!("Failed to copy node {} to {}: {}", record.id(), new_id, e);
                outcome
                    .warnings
                    .push(BatchWarning::new(record.id().clone(), CopyStage::InsertNode, &e));
                continue;
            }

            let satellites: Vec<(SatelliteKind, &[String])> = SatelliteKind::ALL
                .iter()
                .map(|kind| (*kind, record.satellite(*kind)))
                .filter(|(_, items)| !items.is_empty())
                .collect();
            for failure in self.store.replace_collections(&new_id, &satellites, None).await {
                outcome
                    .warnings
                    .push(BatchWarning::new(record.id().clone(), CopyStage::Satellites, &failure));
            }

            outcome.created.push(new_id);
            written.push(record);
        }

        for record in written {
            if record.responses.is_empty() {
                continue;
            }
            let Some(new_id) = outcome.id_map.get(record.id()).cloned() else {
                continue;
            };

            let responses = remap_responses(&record.responses, &outcome.id_map);
            if let Err(e) = self.store.backend().replace_responses(&new_id, &responses).await {
                warn!("Failed to copy responses of {} to {}: {}", record.id(), new_id, e);
                let failure = ScriptflowError::satellite_write(new_id.as_str(), Collection::Responses, e);
                outcome
                    .warnings
                    .push(BatchWarning::new(record.id().clone(), CopyStage::Responses, &failure));
            }
        }

        info!(
            "Copied {}/{} nodes into {} scope ({} warnings)",
            outcome.created.len(),
            sources.len(),
            target.scope,
            outcome.warnings.len()
        );
        Ok(outcome)
    }

    fn copy_node(&self, source: &ScriptNode, id: NodeId, target: &CopyTarget) -> ScriptNode {
        let now = Utc::now();
        ScriptNode {
            id,
            position: source.position.offset(self.config.offset()),
            scope: target.scope,
            owner: target.owner.clone(),
            forked_from: Some(source.id.clone()),
            published_at: None,
            created_by: Some(target.actor.clone()),
            updated_by: Some(target.actor.clone()),
            created_at: now,
            updated_at: now,
            ..source.clone()
        }
    }
}
