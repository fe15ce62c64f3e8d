//! SurrealDB implementation of [`GraphBackend`].
//!
//! Rows are flat records of primitive fields: enums are stored as their
//! string names, timestamps as RFC 3339 text, node metadata and snapshot
//! payloads as JSON text. Record ids are never read back; every row carries
//! its own key field (`node_id`, `snapshot_id`).

use crate::connection::ConnectionConfig;
use crate::schema::{self, NODE_TABLE, RESPONSE_TABLE, SATELLITE_TABLE, SNAPSHOT_TABLE};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scriptflow_core::error::{Result, ScriptflowError};
use scriptflow_core::id::{NodeId, ProductId, SnapshotId, UserId};
use scriptflow_core::traits::GraphBackend;
use scriptflow_core::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tracing::debug;

/// Graph backend persisting to SurrealDB
pub struct SurrealGraphBackend {
    db: Arc<Surreal<Any>>,
}

impl SurrealGraphBackend {
    /// Wrap an existing connection
    pub fn new(db: Arc<Surreal<Any>>) -> Self {
        Self { db }
    }

    /// Wrap a connection and initialize the schema
    pub async fn with_schema(db: Arc<Surreal<Any>>) -> Result<Self> {
        schema::init_schema(&*db).await?;
        Ok(Self::new(db))
    }

    /// Connect using `config` and initialize the schema
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let db = config.connect().await?;
        Self::with_schema(Arc::new(db)).await
    }

    /// Run a statement whose result is not needed
    async fn execute(&self, what: &str, query: surrealdb::method::Query<'_, Any>) -> Result<()> {
        query
            .await
            .and_then(|response| response.check())
            .map_err(|e| ScriptflowError::storage(format!("Failed to {}: {}", what, e)))?;
        Ok(())
    }

    async fn select_node_ids(&self, ids: &[NodeId]) -> Result<Vec<String>> {
        let mut result = self
            .db
            .query(format!(
                "SELECT VALUE node_id FROM {NODE_TABLE} WHERE node_id INSIDE $ids"
            ))
            .bind(("ids", id_strings(ids)))
            .await
            .map_err(|e| ScriptflowError::storage(format!("Failed to query nodes: {}", e)))?;

        result
            .take(0)
            .map_err(|e| ScriptflowError::storage(format!("Failed to parse node ids: {}", e)))
    }
}

fn id_strings(ids: &[NodeId]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ScriptflowError::storage(format!("Invalid {} '{}': {}", field, value, e)))
}

fn parse_enum<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse().map_err(ScriptflowError::storage)
}

// ==============================================================================
// Row Types
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeRow {
    node_id: String,
    node_type: String,
    title: String,
    script: String,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    metadata: Option<String>,
    x: f64,
    y: f64,
    #[serde(default)]
    topic_group_id: Option<String>,
    product_id: String,
    scope: String,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    forked_from: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default)]
    updated_by: Option<String>,
    created_at: String,
    updated_at: String,
}

impl NodeRow {
    fn from_node(node: &ScriptNode) -> Result<Self> {
        let metadata = node
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        Ok(Self {
            node_id: node.id.to_string(),
            node_type: node.node_type.as_str().to_string(),
            title: node.title.clone(),
            script: node.script.clone(),
            context: node.context.clone(),
            metadata,
            x: node.position.x,
            y: node.position.y,
            topic_group_id: node.topic_group_id.clone(),
            product_id: node.product_id.clone(),
            scope: node.scope.as_str().to_string(),
            owner: node.owner.clone(),
            forked_from: node.forked_from.as_ref().map(|id| id.to_string()),
            published_at: node.published_at.map(|t| t.to_rfc3339()),
            created_by: node.created_by.clone(),
            updated_by: node.updated_by.clone(),
            created_at: node.created_at.to_rfc3339(),
            updated_at: node.updated_at.to_rfc3339(),
        })
    }

    fn into_node(self) -> Result<ScriptNode> {
        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let published_at = self
            .published_at
            .as_deref()
            .map(|t| parse_timestamp("published_at", t))
            .transpose()?;

        Ok(ScriptNode {
            id: NodeId::new(self.node_id),
            node_type: parse_enum(&self.node_type)?,
            title: self.title,
            script: self.script,
            context: self.context,
            metadata,
            position: Position::new(self.x, self.y),
            topic_group_id: self.topic_group_id,
            product_id: self.product_id,
            scope: parse_enum(&self.scope)?,
            owner: self.owner,
            forked_from: self.forked_from.map(NodeId::new),
            published_at,
            created_by: self.created_by,
            updated_by: self.updated_by,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SatelliteRow {
    node_id: String,
    kind: String,
    sort_order: i64,
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResponseRow {
    source_node_id: String,
    label: String,
    next_node_id: String,
    #[serde(default)]
    note: Option<String>,
    sort_order: i64,
}

impl ResponseRow {
    fn into_response(self) -> Response {
        Response {
            label: self.label,
            next_node_id: NodeId::new(self.next_node_id),
            note: self.note,
            sort_order: self.sort_order.max(0) as u32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotSummaryRow {
    snapshot_id: String,
    product_id: String,
    label: String,
    created_by: String,
    created_at: String,
    node_count: i64,
}

impl SnapshotSummaryRow {
    fn into_summary(self) -> Result<SnapshotSummary> {
        Ok(SnapshotSummary {
            created_at: parse_timestamp("created_at", &self.created_at)?,
            id: self.snapshot_id,
            product_id: self.product_id,
            label: self.label,
            created_by: self.created_by,
            node_count: self.node_count.max(0) as usize,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotRow {
    snapshot_id: String,
    product_id: String,
    label: String,
    created_by: String,
    created_at: String,
    node_count: i64,
    payload: String,
}

// ==============================================================================
// GraphBackend Implementation
// ==============================================================================

#[async_trait]
impl GraphBackend for SurrealGraphBackend {
    async fn insert_node(&self, node: &ScriptNode) -> Result<()> {
        if self.node_exists(&node.id).await? {
            return Err(ScriptflowError::DuplicateId(node.id.to_string()));
        }

        let row = NodeRow::from_node(node)?;
        let result = self
            .db
            .query(format!(
                "CREATE type::thing('{NODE_TABLE}', $id) CONTENT $row RETURN NONE"
            ))
            .bind(("id", node.id.to_string()))
            .bind(("row", row))
            .await
            .and_then(|response| response.check());

        match result {
            Ok(_) => {
                debug!("Inserted node {}", node.id);
                Ok(())
            }
            Err(e) if e.to_string().contains("already exists") => {
                Err(ScriptflowError::DuplicateId(node.id.to_string()))
            }
            Err(e) => Err(ScriptflowError::storage(format!("Failed to insert node: {}", e))),
        }
    }

    async fn upsert_node(&self, node: &ScriptNode) -> Result<()> {
        let row = NodeRow::from_node(node)?;
        let query = self
            .db
            .query(format!(
                "UPSERT type::thing('{NODE_TABLE}', $id) CONTENT $row RETURN NONE"
            ))
            .bind(("id", node.id.to_string()))
            .bind(("row", row));
        self.execute("upsert node", query).await?;

        debug!("Upserted node {}", node.id);
        Ok(())
    }

    async fn get_node(&self, id: &NodeId) -> Result<Option<ScriptNode>> {
        let mut result = self
            .db
            .query(format!(
                "SELECT * OMIT id FROM {NODE_TABLE} WHERE node_id = $id"
            ))
            .bind(("id", id.to_string()))
            .await
            .map_err(|e| ScriptflowError::storage(format!("Failed to get node: {}", e)))?;

        let rows: Vec<NodeRow> = result
            .take(0)
            .map_err(|e| ScriptflowError::storage(format!("Failed to parse node: {}", e)))?;

        rows.into_iter().next().map(NodeRow::into_node).transpose()
    }

    async fn node_exists(&self, id: &NodeId) -> Result<bool> {
        let found = self.select_node_ids(std::slice::from_ref(id)).await?;
        Ok(!found.is_empty())
    }

    async fn list_nodes(&self, product_id: &ProductId, scope: Option<Scope>) -> Result<Vec<ScriptNode>> {
        let query = match scope {
            Some(scope) => self
                .db
                .query(format!(
                    "SELECT * OMIT id FROM {NODE_TABLE} WHERE product_id = $product AND scope = $scope"
                ))
                .bind(("product", product_id.clone()))
                .bind(("scope", scope.as_str().to_string())),
            None => self
                .db
                .query(format!(
                    "SELECT * OMIT id FROM {NODE_TABLE} WHERE product_id = $product"
                ))
                .bind(("product", product_id.clone())),
        };

        let mut result = query
            .await
            .map_err(|e| ScriptflowError::storage(format!("Failed to list nodes: {}", e)))?;
        let rows: Vec<NodeRow> = result
            .take(0)
            .map_err(|e| ScriptflowError::storage(format!("Failed to parse nodes: {}", e)))?;

        rows.into_iter().map(NodeRow::into_node).collect()
    }

    async fn list_owned_nodes(&self, owner: &UserId, scope: Scope) -> Result<Vec<ScriptNode>> {
        let mut result = self
            .db
            .query(format!(
                "SELECT * OMIT id FROM {NODE_TABLE} WHERE owner = $owner AND scope = $scope"
            ))
            .bind(("owner", owner.clone()))
            .bind(("scope", scope.as_str().to_string()))
            .await
            .map_err(|e| ScriptflowError::storage(format!("Failed to list owned nodes: {}", e)))?;

        let rows: Vec<NodeRow> = result
            .take(0)
            .map_err(|e| ScriptflowError::storage(format!("Failed to parse nodes: {}", e)))?;

        rows.into_iter().map(NodeRow::into_node).collect()
    }

    async fn delete_nodes(&self, ids: &[NodeId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let existing = self.select_node_ids(ids).await?;
        let query = self
            .db
            .query(format!("DELETE {NODE_TABLE} WHERE node_id INSIDE $ids"))
            .bind(("ids", id_strings(ids)));
        self.execute("delete nodes", query).await?;

        debug!("Deleted {} node rows", existing.len());
        Ok(existing.len())
    }

    async fn get_satellite(&self, id: &NodeId, kind: SatelliteKind) -> Result<Vec<String>> {
        let mut result = self
            .db
            .query(format!(
                "SELECT * OMIT id FROM {SATELLITE_TABLE} WHERE node_id = $id AND kind = $kind ORDER BY sort_order ASC"
            ))
            .bind(("id", id.to_string()))
            .bind(("kind", kind.as_str().to_string()))
            .await
            .map_err(|e| ScriptflowError::storage(format!("Failed to get {}: {}", kind, e)))?;

        let rows: Vec<SatelliteRow> = result
            .take(0)
            .map_err(|e| ScriptflowError::storage(format!("Failed to parse {}: {}", kind, e)))?;

        Ok(rows.into_iter().map(|row| row.text).collect())
    }

    async fn replace_satellite(&self, id: &NodeId, kind: SatelliteKind, items: &[String]) -> Result<()> {
        let rows: Vec<SatelliteRow> = items
            .iter()
            .enumerate()
            .map(|(i, text)| SatelliteRow {
                node_id: id.to_string(),
                kind: kind.as_str().to_string(),
                sort_order: i as i64,
                text: text.clone(),
            })
            .collect();

        let query = self
            .db
            .query(format!(
                "DELETE {SATELLITE_TABLE} WHERE node_id = $id AND kind = $kind;
                 FOR $row IN $rows {{ CREATE {SATELLITE_TABLE} CONTENT $row; }};"
            ))
            .bind(("id", id.to_string()))
            .bind(("kind", kind.as_str().to_string()))
            .bind(("rows", rows));

        self.execute(&format!("replace {}", kind), query).await
    }

    async fn delete_satellites(&self, ids: &[NodeId], kind: SatelliteKind) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let query = self
            .db
            .query(format!(
                "DELETE {SATELLITE_TABLE} WHERE node_id INSIDE $ids AND kind = $kind"
            ))
            .bind(("ids", id_strings(ids)))
            .bind(("kind", kind.as_str().to_string()));

        self.execute(&format!("delete {}", kind), query).await
    }

    async fn get_responses(&self, source: &NodeId) -> Result<Vec<Response>> {
        let mut result = self
            .db
            .query(format!(
                "SELECT * OMIT id FROM {RESPONSE_TABLE} WHERE source_node_id = $id ORDER BY sort_order ASC"
            ))
            .bind(("id", source.to_string()))
            .await
            .map_err(|e| ScriptflowError::storage(format!("Failed to get responses: {}", e)))?;

        let rows: Vec<ResponseRow> = result
            .take(0)
            .map_err(|e| ScriptflowError::storage(format!("Failed to parse responses: {}", e)))?;

        Ok(rows.into_iter().map(ResponseRow::into_response).collect())
    }

    async fn replace_responses(&self, source: &NodeId, responses: &[Response]) -> Result<()> {
        let rows: Vec<ResponseRow> = normalize_sort_order(responses)
            .into_iter()
            .map(|r| ResponseRow {
                source_node_id: source.to_string(),
                label: r.label,
                next_node_id: r.next_node_id.into_inner(),
                note: r.note,
                sort_order: i64::from(r.sort_order),
            })
            .collect();

        let query = self
            .db
            .query(format!(
                "DELETE {RESPONSE_TABLE} WHERE source_node_id = $id;
                 FOR $row IN $rows {{ CREATE {RESPONSE_TABLE} CONTENT $row; }};"
            ))
            .bind(("id", source.to_string()))
            .bind(("rows", rows));

        self.execute("replace responses", query).await
    }

    async fn delete_responses_from(&self, sources: &[NodeId]) -> Result<()> {
        if sources.is_empty() {
            return Ok(());
        }
        let query = self
            .db
            .query(format!(
                "DELETE {RESPONSE_TABLE} WHERE source_node_id INSIDE $ids"
            ))
            .bind(("ids", id_strings(sources)));

        self.execute("delete outgoing responses", query).await
    }

    async fn delete_responses_targeting(&self, targets: &[NodeId]) -> Result<usize> {
        if targets.is_empty() {
            return Ok(0);
        }

        let mut result = self
            .db
            .query(format!(
                "SELECT VALUE source_node_id FROM {RESPONSE_TABLE} WHERE next_node_id INSIDE $ids"
            ))
            .bind(("ids", id_strings(targets)))
            .await
            .map_err(|e| ScriptflowError::storage(format!("Failed to query inbound responses: {}", e)))?;
        let sources: Vec<String> = result
            .take(0)
            .map_err(|e| ScriptflowError::storage(format!("Failed to parse inbound responses: {}", e)))?;

        let query = self
            .db
            .query(format!(
                "DELETE {RESPONSE_TABLE} WHERE next_node_id INSIDE $ids"
            ))
            .bind(("ids", id_strings(targets)));
        self.execute("delete inbound responses", query).await?;

        // Close the gaps left in each affected source's sort order
        let affected: BTreeSet<&String> = sources.iter().collect();
        for source in affected {
            let source = NodeId::new(source.as_str());
            let remaining = self.get_responses(&source).await?;
            self.replace_responses(&source, &remaining).await?;
        }

        Ok(sources.len())
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let row = SnapshotRow {
            snapshot_id: snapshot.id.clone(),
            product_id: snapshot.product_id.clone(),
            label: snapshot.label.clone(),
            created_by: snapshot.created_by.clone(),
            created_at: snapshot.created_at.to_rfc3339(),
            node_count: snapshot.nodes.len() as i64,
            payload: serde_json::to_string(&snapshot.nodes)?,
        };

        let query = self
            .db
            .query(format!(
                "CREATE type::thing('{SNAPSHOT_TABLE}', $id) CONTENT $row RETURN NONE"
            ))
            .bind(("id", snapshot.id.clone()))
            .bind(("row", row));

        self.execute("insert snapshot", query).await
    }

    async fn get_snapshot(&self, id: &SnapshotId) -> Result<Option<Snapshot>> {
        let mut result = self
            .db
            .query(format!(
                "SELECT * OMIT id FROM {SNAPSHOT_TABLE} WHERE snapshot_id = $id"
            ))
            .bind(("id", id.clone()))
            .await
            .map_err(|e| ScriptflowError::storage(format!("Failed to get snapshot: {}", e)))?;

        let rows: Vec<SnapshotRow> = result
            .take(0)
            .map_err(|e| ScriptflowError::storage(format!("Failed to parse snapshot: {}", e)))?;

        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        Ok(Some(Snapshot {
            created_at: parse_timestamp("created_at", &row.created_at)?,
            nodes: serde_json::from_str(&row.payload)?,
            id: row.snapshot_id,
            product_id: row.product_id,
            label: row.label,
            created_by: row.created_by,
        }))
    }

    async fn list_snapshots(&self, product_id: &ProductId) -> Result<Vec<SnapshotSummary>> {
        let mut result = self
            .db
            .query(format!(
                "SELECT snapshot_id, product_id, label, created_by, created_at, node_count \
                 FROM {SNAPSHOT_TABLE} WHERE product_id = $product"
            ))
            .bind(("product", product_id.clone()))
            .await
            .map_err(|e| ScriptflowError::storage(format!("Failed to list snapshots: {}", e)))?;

        let rows: Vec<SnapshotSummaryRow> = result
            .take(0)
            .map_err(|e| ScriptflowError::storage(format!("Failed to parse snapshots: {}", e)))?;

        rows.into_iter().map(SnapshotSummaryRow::into_summary).collect()
    }

    async fn delete_snapshot(&self, id: &SnapshotId) -> Result<bool> {
        let existed = self.get_snapshot(id).await?.is_some();
        let query = self
            .db
            .query(format!("DELETE {SNAPSHOT_TABLE} WHERE snapshot_id = $id"))
            .bind(("id", id.clone()));
        self.execute("delete snapshot", query).await?;
        Ok(existed)
    }
}
