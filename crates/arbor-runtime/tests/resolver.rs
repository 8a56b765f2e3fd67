mod common;

use std::collections::{BTreeMap, BTreeSet};

use arbor_runtime::definition::{Resolver, DEFAULT_MAX_REF_DEPTH};
use arbor_runtime::{resolve, NodeDefinition, NodeId, RuntimeError, TreeDefinition};
use common::{leaf, node};
use proptest::prelude::*;

#[test]
fn reference_is_replaced_by_subtree_with_overrides() {
    let def = TreeDefinition::new(
        node("Sequence").with_child(
            NodeDefinition::reference("patrol")
                .named("north")
                .with_id("patrol-north")
                .with_config("ticks", 5),
        ),
    )
    .with_subtree(
        "patrol",
        leaf("Wait", "patrol").with_config("ticks", 2).with_config("speed", 1),
    );

    let root = resolve(&def, DEFAULT_MAX_REF_DEPTH).unwrap();
    let child = &root.children[0];
    assert_eq!(child.node_type, "Wait");
    assert_eq!(child.name, "north");
    assert_eq!(child.id, Some(NodeId::new("patrol-north")));
    assert_eq!(child.config["ticks"], 5);
    assert_eq!(child.config["speed"], 1);
    assert!(child.subtree.is_none());
}

#[test]
fn subtree_may_recur_in_sibling_branches() {
    let def = TreeDefinition::new(
        node("Sequence").with_children([
            NodeDefinition::reference("step"),
            NodeDefinition::reference("step"),
        ]),
    )
    .with_subtree("step", node("Sequence").with_child(leaf("Success", "ok")));

    let root = resolve(&def, DEFAULT_MAX_REF_DEPTH).unwrap();
    assert_eq!(root.node_count(), 5);
    let ids: BTreeSet<_> = root.ids().into_iter().collect();
    assert_eq!(ids.len(), 5, "sibling copies get distinct ids");
}

#[test]
fn direct_self_reference_is_a_cycle() {
    let def = TreeDefinition::new(NodeDefinition::reference("loop"))
        .with_subtree("loop", node("Sequence").with_child(NodeDefinition::reference("loop")));

    match resolve(&def, DEFAULT_MAX_REF_DEPTH) {
        Err(RuntimeError::CycleDetected { cycle, .. }) => {
            assert_eq!(cycle, vec!["loop".to_string(), "loop".to_string()]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn transitive_reference_is_a_cycle() {
    let def = TreeDefinition::new(NodeDefinition::reference("a"))
        .with_subtree("a", node("Sequence").with_child(NodeDefinition::reference("b")))
        .with_subtree("b", node("Selector").with_child(NodeDefinition::reference("c")))
        .with_subtree("c", NodeDefinition::reference("a"));

    match resolve(&def, DEFAULT_MAX_REF_DEPTH) {
        Err(RuntimeError::CycleDetected { cycle, .. }) => {
            assert_eq!(cycle, ["a", "b", "c", "a"].map(String::from).to_vec());
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn depth_ceiling_is_enforced() {
    let mut def = TreeDefinition::new(NodeDefinition::reference("s0"));
    for i in 0..5 {
        def = def.with_subtree(
            format!("s{i}"),
            node("Sequence").with_child(NodeDefinition::reference(format!("s{}", i + 1))),
        );
    }
    def = def.with_subtree("s5", leaf("Success", "bottom"));

    assert!(resolve(&def, 6).is_ok());
    assert!(matches!(
        resolve(&def, 3),
        Err(RuntimeError::DepthExceeded { limit: 3, .. })
    ));
}

#[test]
fn missing_subtree_and_ref_with_children_are_rejected() {
    let missing = TreeDefinition::new(node("Sequence").with_child(NodeDefinition::reference("nope")));
    match resolve(&missing, DEFAULT_MAX_REF_DEPTH) {
        Err(RuntimeError::MissingSubtree { name, path }) => {
            assert_eq!(name, "nope");
            assert_eq!(path, "0:Sequence/0:");
        }
        other => panic!("expected missing subtree, got {other:?}"),
    }

    let both = TreeDefinition::new(
        NodeDefinition::reference("x").with_child(leaf("Success", "inline")),
    )
    .with_subtree("x", leaf("Success", "x"));
    assert!(matches!(
        resolve(&both, DEFAULT_MAX_REF_DEPTH),
        Err(RuntimeError::InvalidDefinition { .. })
    ));
}

/// Subtree `i` is a sequence referencing each subtree in `edges[i]`.
fn graph_definition(edges: &[Vec<usize>]) -> TreeDefinition {
    let mut def = TreeDefinition::new(NodeDefinition::reference("s0"));
    for (i, targets) in edges.iter().enumerate() {
        let root = if targets.is_empty() {
            leaf("Success", "end")
        } else {
            node("Sequence").with_children(
                targets
                    .iter()
                    .map(|t| NodeDefinition::reference(format!("s{t}"))),
            )
        };
        def = def.with_subtree(format!("s{i}"), root);
    }
    def
}

fn reachable_cycle(edges: &[Vec<usize>]) -> bool {
    fn visit(n: usize, edges: &[Vec<usize>], stack: &mut Vec<usize>, done: &mut BTreeSet<usize>) -> bool {
        if stack.contains(&n) {
            return true;
        }
        if done.contains(&n) {
            return false;
        }
        stack.push(n);
        let found = edges[n].iter().any(|&t| visit(t, edges, stack, done));
        stack.pop();
        done.insert(n);
        found
    }
    visit(0, edges, &mut Vec::new(), &mut BTreeSet::new())
}

proptest! {
    #[test]
    fn resolution_terminates_and_reports_every_cycle(
        edges in (1usize..6).prop_flat_map(|n| {
            prop::collection::vec(prop::collection::vec(0..n, 0..3), n)
        })
    ) {
        let def = graph_definition(&edges);
        let result = Resolver::new(&def.subtrees, DEFAULT_MAX_REF_DEPTH).expand(&def.root);
        if reachable_cycle(&edges) {
            let is_cycle = matches!(result, Err(RuntimeError::CycleDetected { .. }));
            prop_assert!(is_cycle);
        } else {
            prop_assert!(result.is_ok());
        }
    }
}

#[test]
fn resolver_leaves_ids_to_the_identity_pass() {
    let subtrees = BTreeMap::new();
    let root = node("Sequence").with_child(leaf("Success", "ok"));
    let expanded = Resolver::new(&subtrees, DEFAULT_MAX_REF_DEPTH).expand(&root).unwrap();
    assert!(expanded.ids().is_empty());
}
