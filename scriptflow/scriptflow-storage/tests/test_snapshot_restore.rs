//! Snapshot capture and restore of a product's official subgraph.

mod common;

use common::*;
use scriptflow_core::prelude::*;
use scriptflow_storage::FaultPoint;

async fn seed_three(engine: &scriptflow_storage::ContentGraphEngine) {
    official(engine, PRODUCT, "n1", &["n2", "n3"]).await;
    official(engine, PRODUCT, "n2", &["n3"]).await;
    official(engine, PRODUCT, "n3", &[]).await;
}

fn ids(records: &[NodeRecord]) -> Vec<String> {
    records.iter().map(|r| r.id().to_string()).collect()
}

#[tokio::test]
async fn test_restore_brings_back_deleted_node() {
    let (_, engine) = engine();
    seed_three(&engine).await;

    let summary = engine
        .capture_snapshot(&admin(), &PRODUCT.to_string(), "launch")
        .await
        .unwrap();
    assert_eq!(summary.node_count, 3);

    engine.delete_node(&admin(), &"n2".into()).await.unwrap();
    assert_eq!(official_records(&engine, PRODUCT).await.len(), 2);

    let report = engine.restore_snapshot(&admin(), &summary.id).await.unwrap();
    assert_eq!(report.replaced, 2);
    assert_eq!(report.restored, 3);

    let restored = official_records(&engine, PRODUCT).await;
    assert_eq!(ids(&restored), vec!["n1", "n2", "n3"]);

    let n1 = restored.iter().find(|r| r.id() == "n1").unwrap();
    let targets: Vec<&str> = n1.responses.iter().map(|r| r.next_node_id.as_str()).collect();
    assert_eq!(targets, vec!["n2", "n3"]);
    assert_eq!(n1.key_points, vec!["n1 point"]);
}

#[tokio::test]
async fn test_restore_is_idempotent() {
    let (_, engine) = engine();
    seed_three(&engine).await;
    let summary = engine
        .capture_snapshot(&admin(), &PRODUCT.to_string(), "v1")
        .await
        .unwrap();

    engine
        .edit_node(
            &admin(),
            &"n3".into(),
            NodeUpdate {
                script: Some("rewritten".into()),
                warnings: Some(vec!["new".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    official(&engine, PRODUCT, "n4", &["n1"]).await;

    engine.restore_snapshot(&admin(), &summary.id).await.unwrap();
    let once = official_records(&engine, PRODUCT).await;

    engine.restore_snapshot(&admin(), &summary.id).await.unwrap();
    let twice = official_records(&engine, PRODUCT).await;

    assert_eq!(once, twice);
    assert_eq!(ids(&once), vec!["n1", "n2", "n3"]);

    let snapshot = engine.get_snapshot(&admin(), &summary.id).await.unwrap();
    assert_eq!(once, snapshot.nodes);
}

#[tokio::test]
async fn test_restore_leaves_other_products_and_scopes_alone() {
    let (_, engine) = engine();
    seed_three(&engine).await;
    official(&engine, "p2", "q1", &["n1"]).await;
    official(&engine, "p2", "q2", &["q1"]).await;

    let summary = engine
        .capture_snapshot(&admin(), &PRODUCT.to_string(), "v1")
        .await
        .unwrap();

    // Work in other scopes that references the official flow
    let alice = Caller::member("alice");
    let fork = engine.fork(&alice, &["n1".into()]).await.unwrap();
    let fork_id = fork.id_map[&NodeId::from("n1")].clone();
    community(&engine, "bob", "c1", &["n2"]).await;

    // Change the official flow after the capture
    engine.delete_node(&admin(), &"n3".into()).await.unwrap();
    official(&engine, PRODUCT, "n5", &[]).await;

    let other_product = official_records(&engine, "p2").await;
    let fork_before = engine.get_node(&alice, &fork_id).await.unwrap();
    let community_before = engine.get_node(&alice, &"c1".into()).await.unwrap();

    engine.restore_snapshot(&admin(), &summary.id).await.unwrap();

    assert_eq!(official_records(&engine, "p2").await, other_product);
    assert_eq!(engine.get_node(&alice, &fork_id).await.unwrap(), fork_before);
    assert_eq!(
        engine.get_node(&alice, &"c1".into()).await.unwrap(),
        community_before
    );
    assert_eq!(ids(&official_records(&engine, PRODUCT).await), vec!["n1", "n2", "n3"]);
}

#[tokio::test]
async fn test_restore_drops_edges_into_vanished_nodes() {
    let (backend, engine) = engine();
    official(&engine, PRODUCT, "n1", &[]).await;
    let summary = engine
        .capture_snapshot(&admin(), &PRODUCT.to_string(), "v1")
        .await
        .unwrap();

    official(&engine, PRODUCT, "n2", &[]).await;
    sandbox(&engine, "alice", "s1", &["n2", "n1"]).await;

    let report = engine.restore_snapshot(&admin(), &summary.id).await.unwrap();
    assert_eq!(report.inbound_edges_removed, 1);

    let s1 = engine
        .get_node(&Caller::member("alice"), &"s1".into())
        .await
        .unwrap();
    assert_eq!(s1.responses.len(), 1);
    assert_eq!(s1.responses[0].next_node_id, "n1");
    assert!(!backend.node_exists(&"n2".into()).await.unwrap());
}

#[tokio::test]
async fn test_interrupted_restore_converges_on_retry() {
    let (backend, engine) = engine();
    seed_three(&engine).await;
    let summary = engine
        .capture_snapshot(&admin(), &PRODUCT.to_string(), "v1")
        .await
        .unwrap();
    let captured = official_records(&engine, PRODUCT).await;

    engine.delete_node(&admin(), &"n1".into()).await.unwrap();

    for point in [
        FaultPoint::DeleteSatellites(SatelliteKind::Warnings),
        FaultPoint::UpsertNode("n3".into()),
        FaultPoint::ReplaceSatellite("n2".into(), SatelliteKind::KeyPoints),
        FaultPoint::ReplaceResponses("n1".into()),
    ] {
        backend.fail_once(point);
        let err = engine
            .restore_snapshot(&admin(), &summary.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert!(matches!(err, ScriptflowError::RestoreInterrupted { .. }));
    }

    engine.restore_snapshot(&admin(), &summary.id).await.unwrap();
    assert_eq!(official_records(&engine, PRODUCT).await, captured);
}

#[tokio::test]
async fn test_snapshot_listing_and_deletion() {
    let (_, engine) = engine();
    official(&engine, PRODUCT, "n1", &[]).await;
    let product = PRODUCT.to_string();

    let first = engine.capture_snapshot(&admin(), &product, "first").await.unwrap();
    official(&engine, PRODUCT, "n2", &[]).await;
    let second = engine.capture_snapshot(&admin(), &product, "second").await.unwrap();

    let listed = engine.list_snapshots(&admin(), &product).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed[0].created_at >= listed[1].created_at);
    assert_eq!(second.node_count, 2);

    engine.delete_snapshot(&admin(), &first.id).await.unwrap();
    let err = engine.restore_snapshot(&admin(), &first.id).await.unwrap_err();
    assert!(err.is_not_found());

    let listed = engine.list_snapshots(&admin(), &product).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].label, "second");
}
