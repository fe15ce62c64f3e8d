//! Output formatting utilities for the Scriptflow CLI.
//!
//! Human output uses colored markers and key-value listings; JSON output
//! prints the serialized result so commands can be scripted.

use anyhow::Result;
use console::style;
use scriptflow_core::types::{NodeRecord, ScriptNode, SnapshotSummary};
use scriptflow_storage::{BatchWarning, EditLock};
use serde::Serialize;
use std::fmt::Display;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Human,
    /// JSON output for scripting
    Json,
    /// Plain text without colors
    Plain,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        self == Self::Json
    }
}

/// Print a success message
pub fn success(msg: impl Display) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an error message
pub fn error(msg: impl Display) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: impl Display) {
    println!("{} {}", style("⚠").yellow().bold(), msg);
}

/// Print an info message
pub fn info(msg: impl Display) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Print a section header
pub fn header(msg: impl Display) {
    println!("\n{}", style(msg).bold().underlined());
}

/// Print a key-value pair
pub fn kv(key: impl Display, value: impl Display) {
    println!("  {}: {}", style(key).cyan(), value);
}

/// Output data in the specified format
pub fn output<T: Serialize>(data: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(data)?;
            println!("{}", json);
        }
        OutputFormat::Human | OutputFormat::Plain => {
            let json = serde_json::to_string_pretty(data)?;
            println!("{}", json);
        }
    }
    Ok(())
}

/// Print per-item failures of a batch that otherwise completed
pub fn batch_warnings(warnings: &[BatchWarning]) {
    for w in warnings {
        warning(w);
    }
}

/// One-line summary of a node
pub fn node_line(node: &ScriptNode) -> String {
    let mut line = format!("{} [{}] {} ({})", node.id, node.node_type, node.title, node.scope);
    if let Some(owner) = &node.owner {
        line.push_str(&format!(" owner={}", owner));
    }
    if node.published_at.is_some() {
        line.push_str(" published");
    }
    line
}

/// Print a full node record
pub fn node_record(record: &NodeRecord) {
    let node = &record.node;
    header(format!("Node {}", node.id));
    kv("Title", &node.title);
    kv("Type", node.node_type);
    kv("Scope", node.scope);
    kv("Product", &node.product_id);
    if let Some(owner) = &node.owner {
        kv("Owner", owner);
    }
    if let Some(source) = &node.forked_from {
        kv("Forked from", source);
    }
    if let Some(published_at) = node.published_at {
        kv("Published", published_at.to_rfc3339());
    }
    kv("Updated", node.updated_at.to_rfc3339());
    if !node.script.is_empty() {
        kv("Script", &node.script);
    }
    list("Key points", &record.key_points);
    list("Warnings", &record.warnings);
    list("Listen for", &record.listen_for);
    if !record.responses.is_empty() {
        println!("  {}:", style("Responses").cyan());
        for response in &record.responses {
            println!(
                "    {}. {} -> {}",
                response.sort_order, response.label, response.next_node_id
            );
        }
    }
}

fn list(name: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("  {}:", style(name).cyan());
    for item in items {
        println!("    - {}", item);
    }
}

/// One-line summary of a snapshot
pub fn snapshot_line(summary: &SnapshotSummary) -> String {
    format!(
        "{} \"{}\" {} nodes, by {} at {}",
        summary.id,
        summary.label,
        summary.node_count,
        summary.created_by,
        summary.created_at.to_rfc3339()
    )
}

/// One-line summary of a lease
pub fn lock_line(lock: &EditLock) -> String {
    format!(
        "{} held by {} until {} (renewed {}x)",
        lock.node_id,
        lock.holder,
        lock.expires_at.to_rfc3339(),
        lock.renewal_count
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptflow_core::types::{NodeType, Scope};

    #[test]
    fn test_node_line_mentions_owner_and_publication() {
        let mut node = ScriptNode::new(
            "c1".into(),
            "p1",
            NodeType::Close,
            "Wrap up",
            Scope::Community,
            Some("bob".to_string()),
        );
        assert_eq!(node_line(&node), "c1 [close] Wrap up (community) owner=bob");

        node.published_at = Some(node.created_at);
        assert!(node_line(&node).ends_with(" published"));
    }

    #[test]
    fn test_output_json() {
        #[derive(Serialize)]
        struct Probe {
            value: u32,
        }
        assert!(output(&Probe { value: 1 }, OutputFormat::Json).is_ok());
        assert!(OutputFormat::Json.is_json());
        assert!(!OutputFormat::Plain.is_json());
    }
}
