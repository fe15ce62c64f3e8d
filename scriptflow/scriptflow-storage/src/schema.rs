//! Database schema for the content graph.

use scriptflow_core::error::{Result, ScriptflowError};

pub const NODE_TABLE: &str = "script_node";
pub const SATELLITE_TABLE: &str = "node_satellite";
pub const RESPONSE_TABLE: &str = "node_response";
pub const SNAPSHOT_TABLE: &str = "graph_snapshot";

/// SurrealQL schema. Tables are schemaless; indexes back the lookups the
/// graph store performs.
pub const SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS script_node SCHEMALESS;
DEFINE INDEX IF NOT EXISTS script_node_id ON script_node FIELDS node_id UNIQUE;
DEFINE INDEX IF NOT EXISTS script_node_product_scope ON script_node FIELDS product_id, scope;
DEFINE INDEX IF NOT EXISTS script_node_owner ON script_node FIELDS owner, scope;

DEFINE TABLE IF NOT EXISTS node_satellite SCHEMALESS;
DEFINE INDEX IF NOT EXISTS node_satellite_node ON node_satellite FIELDS node_id, kind;

DEFINE TABLE IF NOT EXISTS node_response SCHEMALESS;
DEFINE INDEX IF NOT EXISTS node_response_source ON node_response FIELDS source_node_id;
DEFINE INDEX IF NOT EXISTS node_response_target ON node_response FIELDS next_node_id;

DEFINE TABLE IF NOT EXISTS graph_snapshot SCHEMALESS;
DEFINE INDEX IF NOT EXISTS graph_snapshot_id ON graph_snapshot FIELDS snapshot_id UNIQUE;
DEFINE INDEX IF NOT EXISTS graph_snapshot_product ON graph_snapshot FIELDS product_id;
"#;

/// Initialize the database schema
pub async fn init_schema(db: &surrealdb::Surreal<impl surrealdb::Connection>) -> Result<()> {
    tracing::info!("Initializing content graph schema");

    db.query(SCHEMA)
        .await
        .and_then(|response| response.check())
        .map_err(|e| ScriptflowError::database(format!("Failed to initialize schema: {}", e)))?;

    tracing::info!("Content graph schema initialized");
    Ok(())
}
