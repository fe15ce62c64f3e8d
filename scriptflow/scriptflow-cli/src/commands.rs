//! CLI command implementations.
//!
//! Every command runs against a [`Session`]: an engine opened from the
//! loaded configuration plus the caller identity given on the command line.

use crate::output::{self, OutputFormat};
use anyhow::{Context, Result, bail};
use scriptflow_core::prelude::*;
use scriptflow_storage::{ContentGraphEngine, LockAcquisition};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Engine, caller and output settings shared by all commands
pub struct Session {
    engine: ContentGraphEngine,
    caller: Caller,
    format: OutputFormat,
    heartbeat: Duration,
}

impl Session {
    pub fn new(engine: ContentGraphEngine, caller: Caller, format: OutputFormat, heartbeat: Duration) -> Self {
        Self {
            engine,
            caller,
            format,
            heartbeat,
        }
    }

    /// Open the configured database
    pub async fn open(config: &ScriptflowConfig, caller: Caller, format: OutputFormat) -> Result<Self> {
        let engine = ContentGraphEngine::open(config)
            .await
            .context("Failed to open the content graph database")?;
        let heartbeat = Duration::from_secs(config.locks.heartbeat_interval_secs);
        Ok(Self::new(engine, caller, format, heartbeat))
    }

    /// In-memory session, used for trial runs and tests
    pub fn in_memory(config: &ScriptflowConfig, caller: Caller, format: OutputFormat) -> Self {
        let backend = Arc::new(scriptflow_storage::InMemoryGraphBackend::new());
        let heartbeat = Duration::from_secs(config.locks.heartbeat_interval_secs);
        Self::new(ContentGraphEngine::new(backend, config), caller, format, heartbeat)
    }

    pub fn engine(&self) -> &ContentGraphEngine {
        &self.engine
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }
}

// ============================================================================
// Argument parsing
// ============================================================================

/// Parse a `label=target` edge, optionally `label=target#note`
pub fn parse_response(raw: &str) -> Result<Response> {
    let Some((label, rest)) = raw.split_once('=') else {
        bail!("Response '{}' must look like label=target", raw);
    };
    let (target, note) = match rest.split_once('#') {
        Some((target, note)) => (target, Some(note)),
        None => (rest, None),
    };
    if label.trim().is_empty() || target.trim().is_empty() {
        bail!("Response '{}' needs both a label and a target", raw);
    }

    let response = Response::new(label.trim(), target.trim());
    Ok(match note {
        Some(note) if !note.trim().is_empty() => response.with_note(note.trim()),
        _ => response,
    })
}

pub fn parse_responses(raws: &[String]) -> Result<Vec<Response>> {
    raws.iter().map(|s| parse_response(s)).collect()
}

/// Parse a JSON metadata argument
pub fn parse_metadata(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).with_context(|| format!("Metadata is not valid JSON: {}", raw))
}

/// Parse an `x,y` canvas position
pub fn parse_position(raw: &str) -> Result<Position> {
    let Some((x, y)) = raw.split_once(',') else {
        bail!("Position '{}' must look like x,y", raw);
    };
    let x: f64 = x.trim().parse().with_context(|| format!("Invalid x coordinate in '{}'", raw))?;
    let y: f64 = y.trim().parse().with_context(|| format!("Invalid y coordinate in '{}'", raw))?;
    Ok(Position::new(x, y))
}

fn node_ids(ids: &[String]) -> Vec<NodeId> {
    ids.iter().map(|id| NodeId::new(id.as_str())).collect()
}

// ============================================================================
// Node Commands
// ============================================================================

pub async fn create_node(session: &Session, draft: NodeDraft, scope: Scope) -> Result<()> {
    let record = session.engine.create_node(&session.caller, draft, scope).await?;
    if session.format.is_json() {
        return output::output(&record, session.format);
    }
    output::success(format!("Created {}", output::node_line(&record.node)));
    Ok(())
}

pub async fn seed_product(session: &Session, product_id: &ProductId) -> Result<()> {
    let node = session.engine.seed_product(&session.caller, product_id).await?;
    if session.format.is_json() {
        return output::output(&node, session.format);
    }
    output::success(format!("Product {} opens with {}", product_id, output::node_line(&node)));
    Ok(())
}

pub async fn show_node(session: &Session, id: &str) -> Result<()> {
    let record = session.engine.get_node(&session.caller, &NodeId::new(id)).await?;
    if session.format.is_json() {
        return output::output(&record, session.format);
    }
    output::node_record(&record);
    Ok(())
}

pub async fn list_nodes(session: &Session, product_id: &ProductId, scope: Scope) -> Result<()> {
    let nodes = session.engine.list_nodes(&session.caller, product_id, scope).await?;
    if session.format.is_json() {
        return output::output(&nodes, session.format);
    }

    output::header(format!("{} nodes of {} ({})", scope, product_id, nodes.len()));
    if nodes.is_empty() {
        output::info("No nodes");
    }
    for node in &nodes {
        println!("  {}", output::node_line(node));
    }
    Ok(())
}

pub async fn show_edges(session: &Session, id: &str) -> Result<()> {
    let edges = session.engine.resolve_edges(&session.caller, &NodeId::new(id)).await?;
    if session.format.is_json() {
        return output::output(&edges, session.format);
    }

    output::header(format!("Edges of {}", id));
    for response in &edges.live {
        println!("  {} -> {}", response.label, response.next_node_id);
    }
    for response in &edges.dangling {
        output::warning(format!("{} -> {} (missing target)", response.label, response.next_node_id));
    }
    Ok(())
}

pub async fn edit_node(session: &Session, id: &str, update: NodeUpdate) -> Result<()> {
    let record = session.engine.edit_node(&session.caller, &NodeId::new(id), update).await?;
    if session.format.is_json() {
        return output::output(&record, session.format);
    }
    output::success(format!("Updated {}", output::node_line(&record.node)));
    Ok(())
}

pub async fn delete_node(session: &Session, id: &str) -> Result<()> {
    let report = session.engine.delete_node(&session.caller, &NodeId::new(id)).await?;
    if session.format.is_json() {
        return output::output(&report, session.format);
    }
    output::success(format!("Deleted {}", report.node_id));
    if report.inbound_edges_removed > 0 {
        output::kv("Inbound edges removed", report.inbound_edges_removed);
    }
    Ok(())
}

// ============================================================================
// Lifecycle Commands
// ============================================================================

pub async fn fork(session: &Session, ids: &[String]) -> Result<()> {
    let result = session.engine.fork(&session.caller, &node_ids(ids)).await?;
    if session.format.is_json() {
        return output::output(&result, session.format);
    }

    output::success(format!("Forked {} nodes into {}'s sandbox", result.id_map.len(), session.caller.user_id));
    for (source, copy) in &result.id_map {
        output::kv(source, copy);
    }
    output::batch_warnings(&result.warnings);
    Ok(())
}

pub async fn promote(session: &Session, ids: &[String]) -> Result<()> {
    let result = session.engine.promote(&session.caller, &node_ids(ids)).await?;
    if session.format.is_json() {
        return output::output(&result, session.format);
    }

    output::success(format!("Promoted {} nodes into the official flow", result.official_ids.len()));
    for (source, copy) in &result.id_map {
        output::kv(source, copy);
    }
    output::batch_warnings(&result.warnings);
    Ok(())
}

pub async fn publish(session: &Session, id: &str) -> Result<()> {
    let node = session.engine.publish(&session.caller, &NodeId::new(id)).await?;
    if session.format.is_json() {
        return output::output(&node, session.format);
    }
    output::success(format!("Published {}", output::node_line(&node)));
    Ok(())
}

pub async fn unpublish(session: &Session, id: &str) -> Result<()> {
    let node = session.engine.unpublish(&session.caller, &NodeId::new(id)).await?;
    if session.format.is_json() {
        return output::output(&node, session.format);
    }
    output::success(format!("Withdrew {}", output::node_line(&node)));
    Ok(())
}

// ============================================================================
// Snapshot Commands
// ============================================================================

pub async fn capture_snapshot(session: &Session, product_id: &ProductId, label: &str) -> Result<()> {
    let summary = session
        .engine
        .capture_snapshot(&session.caller, product_id, label)
        .await?;
    if session.format.is_json() {
        return output::output(&summary, session.format);
    }
    output::success(format!("Captured {}", output::snapshot_line(&summary)));
    Ok(())
}

pub async fn restore_snapshot(session: &Session, snapshot_id: &str) -> Result<()> {
    let report = session
        .engine
        .restore_snapshot(&session.caller, &snapshot_id.to_string())
        .await?;
    if session.format.is_json() {
        return output::output(&report, session.format);
    }

    output::success(format!("Restored snapshot {}", report.snapshot_id));
    output::kv("Nodes replaced", report.replaced);
    output::kv("Nodes restored", report.restored);
    output::kv("Inbound edges removed", report.inbound_edges_removed);
    Ok(())
}

pub async fn list_snapshots(session: &Session, product_id: &ProductId) -> Result<()> {
    let snapshots = session.engine.list_snapshots(&session.caller, product_id).await?;
    if session.format.is_json() {
        return output::output(&snapshots, session.format);
    }

    output::header(format!("Snapshots of {} ({})", product_id, snapshots.len()));
    if snapshots.is_empty() {
        output::info("No snapshots");
    }
    for summary in &snapshots {
        println!("  {}", output::snapshot_line(summary));
    }
    Ok(())
}

pub async fn show_snapshot(session: &Session, snapshot_id: &str) -> Result<()> {
    let snapshot = session
        .engine
        .get_snapshot(&session.caller, &snapshot_id.to_string())
        .await?;
    if session.format.is_json() {
        return output::output(&snapshot, session.format);
    }

    output::header(format!("Snapshot {} \"{}\"", snapshot.id, snapshot.label));
    output::kv("Product", &snapshot.product_id);
    output::kv("Created by", &snapshot.created_by);
    output::kv("Created at", snapshot.created_at.to_rfc3339());
    for record in &snapshot.nodes {
        println!("  {}", output::node_line(&record.node));
    }
    Ok(())
}

pub async fn delete_snapshot(session: &Session, snapshot_id: &str) -> Result<()> {
    session
        .engine
        .delete_snapshot(&session.caller, &snapshot_id.to_string())
        .await?;
    if session.format.is_json() {
        return output::output(&serde_json::json!({ "deleted": snapshot_id }), session.format);
    }
    output::success(format!("Deleted snapshot {}", snapshot_id));
    Ok(())
}

// ============================================================================
// Lock Commands
// ============================================================================

/// Hold an edit lease, renewing it every heartbeat.
///
/// Stops after `beats` renewals, or on Ctrl-C when `beats` is `None`, and
/// releases the lease on the way out.
pub async fn hold_lock(session: &Session, id: &str, beats: Option<u32>) -> Result<()> {
    let node_id = NodeId::new(id);
    let lock = session
        .engine
        .acquire_lock(&session.caller, &node_id)
        .await?
        .into_result(&node_id)?;
    if !session.format.is_json() {
        output::success(format!("Holding {}", output::lock_line(&lock)));
    }

    let mut ticker = tokio::time::interval(session.heartbeat);
    ticker.tick().await;
    let mut renewals = 0u32;
    let outcome: Result<()> = loop {
        if beats.is_some_and(|limit| renewals >= limit) {
            break Ok(());
        }
        tokio::select! {
            _ = ticker.tick() => {
                match session.engine.acquire_lock(&session.caller, &node_id).await {
                    Ok(LockAcquisition::Conflict { holder, expires_at }) => {
                        break Err(ScriptflowError::LockConflict {
                            node_id: node_id.to_string(),
                            holder,
                            expires_at,
                        }
                        .into());
                    }
                    Ok(acquired) => {
                        renewals += 1;
                        tracing::debug!("Renewed lease on {} ({:?})", node_id, acquired);
                    }
                    Err(e) => break Err(e.into()),
                }
            }
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    let released = session.engine.release_lock(&session.caller, &node_id);
    if session.format.is_json() {
        output::output(
            &serde_json::json!({ "node_id": node_id, "renewals": renewals, "released": released }),
            session.format,
        )?;
    } else if released {
        output::info(format!("Released {} after {} renewals", node_id, renewals));
    }
    outcome
}

pub async fn lock_status(session: &Session, id: &str) -> Result<()> {
    let status = session.engine.lock_status(&NodeId::new(id));
    if session.format.is_json() {
        return output::output(&status, session.format);
    }
    match status {
        Some(lock) => output::info(output::lock_line(&lock)),
        None => output::info(format!("{} is not locked", id)),
    }
    Ok(())
}

pub async fn list_locks(session: &Session) -> Result<()> {
    let locks = session.engine.list_locks();
    if session.format.is_json() {
        return output::output(&locks, session.format);
    }
    output::header(format!("Active leases ({})", locks.len()));
    for lock in &locks {
        println!("  {}", output::lock_line(lock));
    }
    Ok(())
}

pub async fn lock_stats(session: &Session) -> Result<()> {
    let stats = session.engine.lock_statistics();
    if session.format.is_json() {
        return output::output(&stats, session.format);
    }
    output::header("Lease statistics");
    output::kv("Acquired", stats.total_acquired);
    output::kv("Renewed", stats.total_renewed);
    output::kv("Conflicts", stats.total_conflicts);
    output::kv("Released", stats.total_released);
    output::kv("Active", stats.active_locks);
    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub fn show_config(config: &ScriptflowConfig, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return output::output(config, format);
    }
    output::header("Configuration");
    output::kv("Log level", &config.general.log_level);
    output::kv("Log format", &config.general.log_format);
    output::kv("Database mode", &config.database.mode);
    if let Some(path) = &config.database.path {
        output::kv("Database path", path.display());
    }
    if let Some(url) = &config.database.url {
        output::kv("Database url", url);
    }
    output::kv("Namespace", &config.database.namespace);
    output::kv("Database", &config.database.database);
    output::kv("Lease", format!("{}s", config.locks.lease_duration().as_secs()));
    output::kv("Batch limit", config.batch.max_items);
    Ok(())
}

/// Write the default configuration to `path`
pub async fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    ScriptflowConfig::default().save_to_path(path).await?;
    output::success(format!("Wrote default configuration to {}", path.display()));
    Ok(())
}
