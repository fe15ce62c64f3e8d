//! Shared fixtures for the storage integration tests.

#![allow(dead_code)]

use scriptflow_core::prelude::*;
use scriptflow_storage::copy::IdGenerator;
use scriptflow_storage::{ContentGraphEngine, InMemoryGraphBackend};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const PRODUCT: &str = "p1";

pub fn admin() -> Caller {
    Caller::admin("root")
}

pub fn engine() -> (Arc<InMemoryGraphBackend>, ContentGraphEngine) {
    let backend = Arc::new(InMemoryGraphBackend::new());
    let engine = ContentGraphEngine::new(backend.clone(), &ScriptflowConfig::default());
    (backend, engine)
}

/// Identifiers `{prefix}1`, `{prefix}2`, ...
pub fn sequential_ids(prefix: &'static str) -> IdGenerator {
    let counter = Arc::new(AtomicUsize::new(1));
    Arc::new(move || NodeId::new(format!("{prefix}{}", counter.fetch_add(1, Ordering::SeqCst))))
}

/// Hand out `scripted` first, then random identifiers
pub fn scripted_ids(scripted: &[&str]) -> IdGenerator {
    let queue: parking_lot::Mutex<VecDeque<NodeId>> =
        parking_lot::Mutex::new(scripted.iter().map(|s| NodeId::from(*s)).collect());
    Arc::new(move || queue.lock().pop_front().unwrap_or_else(NodeId::generate))
}

pub fn draft(product: &str, id: &str, targets: &[&str]) -> NodeDraft {
    NodeDraft {
        id: Some(id.into()),
        product_id: product.to_string(),
        node_type: Some(NodeType::Discovery),
        title: format!("Node {id}"),
        script: format!("Script of {id}"),
        key_points: vec![format!("{id} point")],
        responses: targets
            .iter()
            .map(|t| Response::new(format!("to {t}"), *t))
            .collect(),
        ..Default::default()
    }
}

pub async fn official(engine: &ContentGraphEngine, product: &str, id: &str, targets: &[&str]) -> NodeRecord {
    engine
        .create_node(&admin(), draft(product, id, targets), Scope::Official)
        .await
        .unwrap()
}

pub async fn sandbox(engine: &ContentGraphEngine, owner: &str, id: &str, targets: &[&str]) -> NodeRecord {
    engine
        .create_node(&Caller::member(owner), draft(PRODUCT, id, targets), Scope::Sandbox)
        .await
        .unwrap()
}

pub async fn community(engine: &ContentGraphEngine, owner: &str, id: &str, targets: &[&str]) -> NodeRecord {
    let record = sandbox(engine, owner, id, targets).await;
    engine
        .publish(&Caller::member(owner), record.id())
        .await
        .unwrap();
    engine
        .get_node(&Caller::member(owner), record.id())
        .await
        .unwrap()
}

pub async fn official_records(engine: &ContentGraphEngine, product: &str) -> Vec<NodeRecord> {
    engine
        .store()
        .list_records(&product.to_string(), Scope::Official)
        .await
        .unwrap()
}
