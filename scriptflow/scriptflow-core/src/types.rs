//! Core types of the script content graph.

use crate::id::{NodeId, ProductId, SnapshotId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Visibility and edit-rights state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Production flow, edited by administrators only
    Official,
    /// Published by an author for everyone to see and fork
    Community,
    /// Private experimentation space of one author
    Sandbox,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Official => "official",
            Self::Community => "community",
            Self::Sandbox => "sandbox",
        }
    }

    /// Whether nodes in this scope must carry an owner
    pub fn requires_owner(&self) -> bool {
        !matches!(self, Self::Official)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "official" => Ok(Self::Official),
            "community" => Ok(Self::Community),
            "sandbox" => Ok(Self::Sandbox),
            other => Err(format!("unknown scope '{other}'")),
        }
    }
}

/// Category of a script node within a conversation flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Opening,
    Discovery,
    Pitch,
    Objection,
    Close,
    End,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Discovery => "discovery",
            Self::Pitch => "pitch",
            Self::Objection => "objection",
            Self::Close => "close",
            Self::End => "end",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "opening" => Ok(Self::Opening),
            "discovery" => Ok(Self::Discovery),
            "pitch" => Ok(Self::Pitch),
            "objection" => Ok(Self::Objection),
            "close" => Ok(Self::Close),
            "end" => Ok(Self::End),
            other => Err(format!("unknown node type '{other}'")),
        }
    }
}

/// Position of a node on the authoring canvas.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Translate by a delta
    pub fn offset(&self, delta: Position) -> Self {
        Self {
            x: self.x + delta.x,
            y: self.y + delta.y,
        }
    }
}

/// A unit of authored content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptNode {
    pub id: NodeId,
    pub node_type: NodeType,
    pub title: String,
    pub script: String,
    /// Coaching note shown alongside the script
    pub context: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub position: Position,
    pub topic_group_id: Option<String>,
    pub product_id: ProductId,
    pub scope: Scope,
    /// Required for sandbox and community nodes, absent for official ones
    pub owner: Option<UserId>,
    /// Provenance only; may dangle
    pub forked_from: Option<NodeId>,
    /// Set while the node is in community scope
    pub published_at: Option<DateTime<Utc>>,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScriptNode {
    /// Create a node with empty body text at the origin
    pub fn new(
        id: NodeId,
        product_id: impl Into<ProductId>,
        node_type: NodeType,
        title: impl Into<String>,
        scope: Scope,
        owner: Option<UserId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            node_type,
            title: title.into(),
            script: String::new(),
            context: None,
            metadata: None,
            position: Position::default(),
            topic_group_id: None,
            product_id: product_id.into(),
            scope,
            created_by: owner.clone(),
            updated_by: owner.clone(),
            owner,
            forked_from: None,
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Official nodes have no owner; sandbox and community nodes always do.
    pub fn scope_owner_consistent(&self) -> bool {
        self.scope.requires_owner() == self.owner.is_some()
    }

    /// Whether `user` owns this node
    pub fn is_owned_by(&self, user: &str) -> bool {
        self.owner.as_deref() == Some(user)
    }
}

/// A directed, labeled transition to another node.
///
/// The target is a soft reference and may point at a node that does not
/// exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub label: String,
    pub next_node_id: NodeId,
    pub note: Option<String>,
    pub sort_order: u32,
}

impl Response {
    pub fn new(label: impl Into<String>, next_node_id: impl Into<NodeId>) -> Self {
        Self {
            label: label.into(),
            next_node_id: next_node_id.into(),
            note: None,
            sort_order: 0,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Renumber responses so `sort_order` is contiguous from zero in list order.
pub fn normalize_sort_order(responses: &[Response]) -> Vec<Response> {
    responses
        .iter()
        .enumerate()
        .map(|(i, r)| Response {
            sort_order: i as u32,
            ..r.clone()
        })
        .collect()
}

/// Ordered text lists attached to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SatelliteKind {
    KeyPoints,
    Warnings,
    ListenFor,
}

impl SatelliteKind {
    pub const ALL: [SatelliteKind; 3] = [Self::KeyPoints, Self::Warnings, Self::ListenFor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyPoints => "key_points",
            Self::Warnings => "warnings",
            Self::ListenFor => "listen_for",
        }
    }
}

impl fmt::Display for SatelliteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every structurally independent collection hanging off a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Satellite(SatelliteKind),
    Responses,
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Satellite(kind) => kind.fmt(f),
            Self::Responses => f.write_str("responses"),
        }
    }
}

/// A node together with all of its satellite data and outgoing edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node: ScriptNode,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub listen_for: Vec<String>,
    #[serde(default)]
    pub responses: Vec<Response>,
}

impl NodeRecord {
    pub fn new(node: ScriptNode) -> Self {
        Self {
            node,
            key_points: Vec::new(),
            warnings: Vec::new(),
            listen_for: Vec::new(),
            responses: Vec::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.node.id
    }

    pub fn satellite(&self, kind: SatelliteKind) -> &[String] {
        match kind {
            SatelliteKind::KeyPoints => &self.key_points,
            SatelliteKind::Warnings => &self.warnings,
            SatelliteKind::ListenFor => &self.listen_for,
        }
    }

    pub fn satellite_mut(&mut self, kind: SatelliteKind) -> &mut Vec<String> {
        match kind {
            SatelliteKind::KeyPoints => &mut self.key_points,
            SatelliteKind::Warnings => &mut self.warnings,
            SatelliteKind::ListenFor => &mut self.listen_for,
        }
    }
}

/// Input for creating a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeDraft {
    /// Caller-chosen identifier; generated when absent
    pub id: Option<NodeId>,
    pub product_id: ProductId,
    pub node_type: Option<NodeType>,
    pub title: String,
    #[serde(default)]
    pub script: String,
    pub context: Option<String>,
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub position: Position,
    pub topic_group_id: Option<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub listen_for: Vec<String>,
    #[serde(default)]
    pub responses: Vec<Response>,
}

/// Partial update of a node. `None` leaves a field untouched; a supplied
/// satellite list replaces the stored one wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub node_type: Option<NodeType>,
    pub title: Option<String>,
    pub script: Option<String>,
    pub context: Option<Option<String>>,
    pub metadata: Option<Option<serde_json::Value>>,
    pub position: Option<Position>,
    pub topic_group_id: Option<Option<String>>,
    pub key_points: Option<Vec<String>>,
    pub warnings: Option<Vec<String>>,
    pub listen_for: Option<Vec<String>>,
    pub responses: Option<Vec<Response>>,
}

impl NodeUpdate {
    pub fn satellite(&self, kind: SatelliteKind) -> Option<&Vec<String>> {
        match kind {
            SatelliteKind::KeyPoints => self.key_points.as_ref(),
            SatelliteKind::Warnings => self.warnings.as_ref(),
            SatelliteKind::ListenFor => self.listen_for.as_ref(),
        }
    }

    /// Apply the scalar part of the delta to `node`
    pub fn apply_fields(&self, node: &mut ScriptNode) {
        if let Some(node_type) = self.node_type {
            node.node_type = node_type;
        }
        if let Some(title) = &self.title {
            node.title = title.clone();
        }
        if let Some(script) = &self.script {
            node.script = script.clone();
        }
        if let Some(context) = &self.context {
            node.context = context.clone();
        }
        if let Some(metadata) = &self.metadata {
            node.metadata = metadata.clone();
        }
        if let Some(position) = self.position {
            node.position = position;
        }
        if let Some(topic_group_id) = &self.topic_group_id {
            node.topic_group_id = topic_group_id.clone();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.node_type.is_none()
            && self.title.is_none()
            && self.script.is_none()
            && self.context.is_none()
            && self.metadata.is_none()
            && self.position.is_none()
            && self.topic_group_id.is_none()
            && self.key_points.is_none()
            && self.warnings.is_none()
            && self.listen_for.is_none()
            && self.responses.is_none()
    }
}

/// Immutable point-in-time copy of a product's official subgraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub product_id: ProductId,
    pub label: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub nodes: Vec<NodeRecord>,
}

impl Snapshot {
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            id: self.id.clone(),
            product_id: self.product_id.clone(),
            label: self.label.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            node_count: self.nodes.len(),
        }
    }
}

/// Snapshot listing entry without the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: SnapshotId,
    pub product_id: ProductId,
    pub label: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub node_count: usize,
}
