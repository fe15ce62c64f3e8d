//! Fork, promote and publish behaviour of the content graph engine.

mod common;

use common::*;
use scriptflow_core::prelude::*;
use scriptflow_storage::{CopyStage, FaultPoint};
use std::collections::HashSet;

// ==============================================================================
// Fork
// ==============================================================================

#[tokio::test]
async fn test_fork_remaps_internal_edges_and_keeps_external_ones() {
    let (backend, engine) = engine();
    official(&engine, PRODUCT, "n1", &["n2"]).await;
    official(&engine, PRODUCT, "n2", &["n3"]).await;
    official(&engine, PRODUCT, "n3", &[]).await;

    let alice = Caller::member("alice");
    let result = engine
        .fork(&alice, &["n1".into(), "n2".into()])
        .await
        .unwrap();
    assert!(result.warnings.is_empty());
    assert_eq!(result.id_map.len(), 2);

    let m1 = result.id_map[&NodeId::from("n1")].clone();
    let m2 = result.id_map[&NodeId::from("n2")].clone();
    assert_ne!(m1, m2);

    let copy1 = engine.get_node(&alice, &m1).await.unwrap();
    let copy2 = engine.get_node(&alice, &m2).await.unwrap();
    assert_eq!(copy1.responses.len(), 1);
    assert_eq!(copy1.responses[0].next_node_id, m2);
    assert_eq!(copy2.responses.len(), 1);
    assert_eq!(copy2.responses[0].next_node_id, "n3");

    // Sources are untouched
    let n1 = engine.get_node(&alice, &"n1".into()).await.unwrap();
    assert_eq!(n1.node.scope, Scope::Official);
    assert_eq!(n1.responses[0].next_node_id, "n2");

    assert_eq!(copy1.node.scope, Scope::Sandbox);
    assert_eq!(copy1.node.owner.as_deref(), Some("alice"));
    assert_eq!(copy1.node.forked_from, Some(NodeId::from("n1")));
    assert_eq!(copy1.key_points, vec!["n1 point"]);
    assert_eq!(backend.node_count(), 5);
}

#[tokio::test]
async fn test_fork_identifiers_never_collide() {
    let (backend, engine) = engine();
    for id in ["n1", "n2", "n3", "x1"] {
        official(&engine, PRODUCT, id, &[]).await;
    }
    // The generator first proposes taken and repeated identifiers
    let engine = engine.with_id_generator(scripted_ids(&["n1", "x1", "x2", "x2", "n3", "x3", "x4"]));

    let existing: HashSet<NodeId> = official_records(&engine, PRODUCT)
        .await
        .into_iter()
        .map(|r| r.node.id)
        .collect();

    let result = engine
        .fork(&Caller::member("alice"), &["n1".into(), "n2".into(), "n3".into()])
        .await
        .unwrap();

    let new_ids: HashSet<NodeId> = result.id_map.values().cloned().collect();
    assert_eq!(new_ids.len(), 3);
    assert!(new_ids.is_disjoint(&existing));
    assert_eq!(
        new_ids,
        ["x2", "x3", "x4"].into_iter().map(NodeId::from).collect()
    );
    assert_eq!(backend.node_count(), 7);
}

#[tokio::test]
async fn test_fork_of_community_node() {
    let (_, engine) = engine();
    community(&engine, "bob", "c1", &[]).await;

    let alice = Caller::member("alice");
    let result = engine.fork(&alice, &["c1".into()]).await.unwrap();
    let copy = engine
        .get_node(&alice, &result.id_map[&NodeId::from("c1")])
        .await
        .unwrap();
    assert_eq!(copy.node.owner.as_deref(), Some("alice"));
    assert!(copy.node.published_at.is_none());
}

#[tokio::test]
async fn test_fork_rejects_sandbox_sources_without_writing() {
    let (backend, engine) = engine();
    official(&engine, PRODUCT, "n1", &[]).await;
    sandbox(&engine, "alice", "s1", &[]).await;
    let before = backend.node_count();

    let err = engine
        .fork(&Caller::member("alice"), &["n1".into(), "s1".into()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(backend.node_count(), before);

    // Someone else's sandbox node is invisible
    let err = engine
        .fork(&Caller::member("bob"), &["s1".into()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_fork_continues_past_failed_member() {
    let (backend, engine) = engine();
    official(&engine, PRODUCT, "n1", &["n2"]).await;
    official(&engine, PRODUCT, "n2", &["n1"]).await;
    official(&engine, PRODUCT, "n3", &[]).await;
    let engine = engine.with_id_generator(sequential_ids("m"));
    backend.fail_once(FaultPoint::InsertNode("m2".into()));

    let alice = Caller::member("alice");
    let result = engine
        .fork(&alice, &["n1".into(), "n2".into(), "n3".into()])
        .await
        .unwrap();

    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].node_id, "n2");
    assert_eq!(result.warnings[0].stage, CopyStage::InsertNode);

    // Siblings were copied; the edge to the failed member points at its
    // planned identifier and is reported as dangling
    let m1 = engine.get_node(&alice, &"m1".into()).await.unwrap();
    assert_eq!(m1.responses[0].next_node_id, "m2");
    assert!(engine.get_node(&alice, &"m3".into()).await.is_ok());

    let edges = engine.resolve_edges(&alice, &"m1".into()).await.unwrap();
    assert!(edges.live.is_empty());
    assert_eq!(edges.dangling.len(), 1);
}

#[tokio::test]
async fn test_fork_reports_satellite_failures_per_item() {
    let (backend, engine) = engine();
    official(&engine, PRODUCT, "n1", &["n9"]).await;
    let engine = engine.with_id_generator(sequential_ids("m"));
    backend.fail_once(FaultPoint::ReplaceResponses("m1".into()));

    let alice = Caller::member("alice");
    let result = engine.fork(&alice, &["n1".into()]).await.unwrap();

    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].stage, CopyStage::Responses);

    let copy = engine.get_node(&alice, &"m1".into()).await.unwrap();
    assert_eq!(copy.key_points, vec!["n1 point"]);
    assert!(copy.responses.is_empty());
}

// ==============================================================================
// Promote
// ==============================================================================

#[tokio::test]
async fn test_promote_clones_and_reverts_original() {
    let (_, engine) = engine();
    community(&engine, "bob", "c1", &["n5"]).await;

    let result = engine.promote(&admin(), &["c1".into()]).await.unwrap();
    assert!(result.warnings.is_empty());
    assert_eq!(result.official_ids.len(), 1);

    let bob = Caller::member("bob");
    let original = engine.get_node(&bob, &"c1".into()).await.unwrap();
    assert_eq!(original.node.scope, Scope::Sandbox);
    assert!(original.node.published_at.is_none());
    assert_eq!(original.node.owner.as_deref(), Some("bob"));

    let promoted = engine
        .get_node(&admin(), &result.official_ids[0])
        .await
        .unwrap();
    assert_eq!(promoted.node.scope, Scope::Official);
    assert!(promoted.node.owner.is_none());
    assert_eq!(promoted.node.forked_from, Some(NodeId::from("c1")));
    assert_eq!(promoted.responses[0].next_node_id, "n5");

    // The reverted original cannot be promoted a second time
    let err = engine.promote(&admin(), &["c1".into()]).await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_promote_revert_keeps_concurrent_edit() {
    let (backend, engine) = engine();
    community(&engine, "bob", "c1", &[]).await;

    // The id generator runs after the sources are read and before the
    // originals are reverted, standing in for an edit landing mid-copy.
    let editor = backend.clone();
    let engine = engine.with_id_generator(std::sync::Arc::new(move || {
        editor.modify_node(&"c1".into(), |node| node.title = "Edited meanwhile".into());
        NodeId::generate()
    }));

    let result = engine.promote(&admin(), &["c1".into()]).await.unwrap();
    assert!(result.warnings.is_empty());

    let original = engine
        .get_node(&Caller::member("bob"), &"c1".into())
        .await
        .unwrap();
    assert_eq!(original.node.title, "Edited meanwhile");
    assert_eq!(original.node.scope, Scope::Sandbox);
    assert!(original.node.published_at.is_none());
}

#[tokio::test]
async fn test_promote_batch_remaps_between_members() {
    let (_, engine) = engine();
    community(&engine, "bob", "c1", &["c2"]).await;
    community(&engine, "carol", "c2", &[]).await;

    let result = engine
        .promote(&admin(), &["c1".into(), "c2".into()])
        .await
        .unwrap();
    let o1 = &result.id_map[&NodeId::from("c1")];
    let o2 = &result.id_map[&NodeId::from("c2")];

    let promoted = engine.get_node(&admin(), o1).await.unwrap();
    assert_eq!(&promoted.responses[0].next_node_id, o2);

    let official = official_records(&engine, PRODUCT).await;
    assert_eq!(official.len(), 2);
}

#[tokio::test]
async fn test_promote_requires_admin_and_community_scope() {
    let (backend, engine) = engine();
    community(&engine, "bob", "c1", &[]).await;
    official(&engine, PRODUCT, "n1", &[]).await;
    let before = backend.node_count();

    let err = engine
        .promote(&Caller::member("bob"), &["c1".into()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let err = engine
        .promote(&admin(), &["c1".into(), "n1".into()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(backend.node_count(), before);
    let c1 = engine.get_node(&Caller::member("bob"), &"c1".into()).await.unwrap();
    assert_eq!(c1.node.scope, Scope::Community);
}

#[tokio::test]
async fn test_promote_reports_failed_revert() {
    let (backend, engine) = engine();
    community(&engine, "bob", "c1", &[]).await;
    backend.fail_once(FaultPoint::UpsertNode("c1".into()));

    let result = engine.promote(&admin(), &["c1".into()]).await.unwrap();
    assert_eq!(result.official_ids.len(), 1);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].stage, CopyStage::RevertOriginal);
}

// ==============================================================================
// Edit and delete
// ==============================================================================

#[tokio::test]
async fn test_direct_edit_permissions() {
    let (_, engine) = engine();
    official(&engine, PRODUCT, "n1", &[]).await;
    community(&engine, "bob", "c1", &[]).await;

    let update = NodeUpdate {
        title: Some("Better".into()),
        ..Default::default()
    };

    let err = engine
        .edit_node(&Caller::member("bob"), &"n1".into(), update.clone())
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());

    let err = engine
        .edit_node(&Caller::member("alice"), &"c1".into(), update.clone())
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());

    let edited = engine
        .edit_node(&Caller::member("bob"), &"c1".into(), update)
        .await
        .unwrap();
    assert_eq!(edited.node.title, "Better");
    assert_eq!(edited.node.scope, Scope::Community);
    assert_eq!(edited.key_points, vec!["c1 point"]);
}

#[tokio::test]
async fn test_edit_reports_partial_satellite_failure() {
    let (backend, engine) = engine();
    official(&engine, PRODUCT, "n1", &[]).await;
    backend.fail_once(FaultPoint::ReplaceSatellite("n1".into(), SatelliteKind::Warnings));

    let update = NodeUpdate {
        key_points: Some(vec!["new point".into()]),
        warnings: Some(vec!["new warning".into()]),
        ..Default::default()
    };
    let err = engine
        .edit_node(&admin(), &"n1".into(), update)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartialFailure);

    // The independent collection was still written
    let n1 = engine.get_node(&admin(), &"n1".into()).await.unwrap();
    assert_eq!(n1.key_points, vec!["new point"]);
    assert!(n1.warnings.is_empty());
}

#[tokio::test]
async fn test_delete_strips_edges_elsewhere() {
    let (backend, engine) = engine();
    official(&engine, PRODUCT, "n1", &["n2"]).await;
    official(&engine, PRODUCT, "n2", &["n1"]).await;
    sandbox(&engine, "alice", "s1", &["n2", "n1"]).await;

    let report = engine.delete_node(&admin(), &"n2".into()).await.unwrap();
    assert_eq!(report.inbound_edges_removed, 2);

    let s1 = engine
        .get_node(&Caller::member("alice"), &"s1".into())
        .await
        .unwrap();
    assert_eq!(s1.responses.len(), 1);
    assert_eq!(s1.responses[0].next_node_id, "n1");
    assert_eq!(s1.responses[0].sort_order, 0);
    assert_eq!(backend.response_count(), 1);
}

#[tokio::test]
async fn test_create_rejects_malformed_edges_without_writing() {
    let (backend, engine) = engine();
    let alice = Caller::member("alice");

    for responses in [
        vec![Response::new("", "n2")],
        vec![Response::new("go", "")],
        vec![Response::new("go", "n2"), Response::new("go", " n2 ")],
    ] {
        let draft = NodeDraft {
            responses,
            ..draft(PRODUCT, "s1", &[])
        };
        let err = engine
            .create_node(&alice, draft, Scope::Sandbox)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
    assert_eq!(backend.node_count(), 0);
    assert_eq!(backend.response_count(), 0);
}

#[tokio::test]
async fn test_edit_rejects_malformed_edges_without_writing() {
    let (backend, engine) = engine();
    official(&engine, PRODUCT, "n1", &["n2"]).await;

    let update = NodeUpdate {
        title: Some("Renamed".into()),
        responses: Some(vec![Response::new("  ", "n3")]),
        ..Default::default()
    };
    let err = engine
        .edit_node(&admin(), &"n1".into(), update)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let n1 = engine.get_node(&admin(), &"n1".into()).await.unwrap();
    assert_eq!(n1.node.title, "Node n1");
    assert_eq!(n1.responses[0].next_node_id, "n2");
    assert_eq!(backend.response_count(), 1);
}
