//! Property tests for identifier planning and edge remapping of deep copies.

mod common;

use common::*;
use proptest::prelude::*;
use scriptflow_core::prelude::*;
use scriptflow_storage::copy::remap_responses;
use std::collections::{BTreeMap, HashSet};

/// A product graph of `size` official nodes `n0..`, with edges given as
/// (source, target) index pairs; targets past `size` are external ids.
fn graph_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize)>, Vec<bool>)> {
    (1usize..8).prop_flat_map(|size| {
        (
            Just(size),
            prop::collection::vec((0..size, 0..size + 3), 0..16),
            prop::collection::vec(any::<bool>(), size),
        )
    })
}

fn node_name(i: usize) -> String {
    format!("n{i}")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_fork_preserves_graph_shape((size, edges, selected) in graph_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (backend, engine) = engine();
            for i in 0..size {
                let targets: Vec<String> = edges
                    .iter()
                    .filter(|(s, _)| *s == i)
                    .map(|(_, t)| node_name(*t))
                    .collect();
                let targets: Vec<&str> = targets.iter().map(String::as_str).collect();
                official(&engine, PRODUCT, &node_name(i), &targets).await;
            }
            let before = backend.node_count();

            let mut chosen: Vec<NodeId> = (0..size)
                .filter(|i| selected[*i])
                .map(|i| NodeId::new(node_name(i)))
                .collect();
            if chosen.is_empty() {
                chosen.push(NodeId::new(node_name(0)));
            }

            let alice = Caller::member("alice");
            let result = engine.fork(&alice, &chosen).await.unwrap();
            prop_assert!(result.warnings.is_empty());
            prop_assert_eq!(result.id_map.len(), chosen.len());
            prop_assert_eq!(backend.node_count(), before + chosen.len());

            let new_ids: HashSet<&NodeId> = result.id_map.values().collect();
            prop_assert_eq!(new_ids.len(), chosen.len());
            for i in 0..size + 3 {
                prop_assert!(!new_ids.contains(&NodeId::new(node_name(i))));
            }

            for source in &chosen {
                let original = engine.get_node(&alice, source).await.unwrap();
                let copy = engine.get_node(&alice, &result.id_map[source]).await.unwrap();
                prop_assert_eq!(copy.responses.len(), original.responses.len());

                for (before, after) in original.responses.iter().zip(&copy.responses) {
                    let expected = result
                        .id_map
                        .get(&before.next_node_id)
                        .unwrap_or(&before.next_node_id);
                    prop_assert_eq!(&after.next_node_id, expected);
                    prop_assert_eq!(&after.label, &before.label);
                    prop_assert_eq!(after.sort_order, before.sort_order);
                }
            }
            Ok(())
        })?;
    }

    #[test]
    fn test_remap_only_touches_mapped_targets(
        targets in prop::collection::vec("[a-e]", 0..12),
        mapped in prop::collection::btree_set("[a-e]", 0..5),
    ) {
        let id_map: BTreeMap<NodeId, NodeId> = mapped
            .iter()
            .map(|t| (NodeId::new(t.as_str()), NodeId::new(format!("copy-{t}"))))
            .collect();
        let responses: Vec<Response> = targets.iter().map(|t| Response::new("go", t.as_str())).collect();

        let remapped = remap_responses(&responses, &id_map);
        prop_assert_eq!(remapped.len(), responses.len());
        for (before, after) in responses.iter().zip(&remapped) {
            if mapped.contains(before.next_node_id.as_str()) {
                prop_assert_eq!(after.next_node_id.to_string(), format!("copy-{}", before.next_node_id));
            } else {
                prop_assert_eq!(&after.next_node_id, &before.next_node_id);
            }
        }
    }
}
