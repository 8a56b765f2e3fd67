mod common;

use arbor_runtime::{NodeDefinition, RuntimeError, TreeDefinition};
use common::{leaf, node, runtime};

#[test]
fn valid_definition_passes() {
    let def = TreeDefinition::new(
        node("Sequence").with_children([leaf("Success", "a"), NodeDefinition::reference("tail")]),
    )
    .with_subtree("tail", leaf("Wait", "tail").with_config("ticks", 2));

    let report = runtime().validate(&def);
    assert!(report.is_ok(), "{:?}", report.issues);
    assert!(report.round_trip_ok);
    assert!(report.into_result().is_ok());
}

#[test]
fn findings_are_collected_not_raised() {
    let mut def = TreeDefinition::new(node("Sequence").with_children([
        leaf("Teleport", "jump").with_id("x"),
        node("Inverter").with_id("x"),
    ]));
    def.metadata.identity_scheme = Some("legacy/v0".to_string());

    let report = runtime().validate(&def);
    let messages: Vec<&str> = report.issues.iter().map(|i| i.message.as_str()).collect();
    assert!(messages.iter().any(|m| m.contains("legacy/v0")));
    assert!(messages.iter().any(|m| m.contains("unknown node type 'Teleport'")));
    assert!(messages.iter().any(|m| m.contains("already used")));
    assert!(messages.iter().any(|m| m.contains("expects exactly 1 children")));

    match report.into_result() {
        Err(RuntimeError::ValidationFailed { issues }) => assert_eq!(issues.len(), 4),
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[test]
fn resolution_errors_become_issues() {
    let def = TreeDefinition::new(NodeDefinition::reference("missing"));
    let report = runtime().validate(&def);
    assert!(!report.is_ok());
    assert!(report.issues[0].message.contains("missing"));
}
