use arbor_core::{Blackboard, Status, TickContext};
use arbor_nodes::leaves::{Constant, Wait};
use arbor_nodes::{BehaviorTree, MemSequence, NodeTag, Parallel, RuntimeNode, Selector, Sequence};

fn ctx(tick: u64) -> TickContext {
    TickContext::new(tick, 0)
}

fn leaf(name: &str, status: Status) -> Box<dyn RuntimeNode> {
    Box::new(Constant::new(name, status))
}

#[test]
fn reactive_sequence_reports_running_child() {
    let mut seq = Sequence::new(
        "seq",
        vec![leaf("a", Status::Success), Box::new(Wait::new("b", 2))],
    );
    let mut bb = Blackboard::new();

    assert_eq!(seq.tick(&ctx(1), &mut bb).unwrap(), Status::Running);
    assert_eq!(seq.active_child(), Some(1));
    assert_eq!(seq.children()[1].status(), Some(Status::Running));
    assert_eq!(seq.children()[1].message(), Some("1/2 ticks"));

    assert_eq!(seq.tick(&ctx(2), &mut bb).unwrap(), Status::Success);
    assert_eq!(seq.active_child(), None);
    assert_eq!(seq.children()[1].status(), Some(Status::Success));
}

#[test]
fn reactive_selector_halts_previous_running_branch() {
    let mut sel = Selector::new(
        "sel",
        vec![Box::new(Wait::new("slow", 10)), leaf("fallback", Status::Success)],
    );
    let mut bb = Blackboard::new();
    assert_eq!(sel.tick(&ctx(1), &mut bb).unwrap(), Status::Running);
    assert_eq!(sel.active_child(), Some(0));

    sel.reset();
    assert_eq!(sel.children()[0].status(), None);
}

#[test]
fn memory_sequence_resumes_at_running_child() {
    let mut seq = MemSequence::new(
        "mem",
        vec![Box::new(Wait::new("first", 1)), Box::new(Wait::new("second", 2))],
    );
    let mut bb = Blackboard::new();

    assert_eq!(seq.tick(&ctx(1), &mut bb).unwrap(), Status::Running);
    assert_eq!(seq.active_child(), Some(1));
    let first_tick = seq.children()[0].state().last_tick;

    assert_eq!(seq.tick(&ctx(2), &mut bb).unwrap(), Status::Success);
    // The first child was not re-ticked on tick 2.
    assert_eq!(seq.children()[0].state().last_tick, first_tick);
}

#[test]
fn parallel_succeeds_at_threshold() {
    let mut par = Parallel::new(
        "par",
        vec![
            leaf("ok", Status::Success),
            leaf("bad", Status::Failure),
            Box::new(Wait::new("later", 2)),
        ],
        Some(2),
    );
    let mut bb = Blackboard::new();
    assert_eq!(par.tick(&ctx(1), &mut bb).unwrap(), Status::Running);
    assert_eq!(par.tick(&ctx(2), &mut bb).unwrap(), Status::Success);
}

#[test]
fn parallel_fails_once_threshold_is_unreachable() {
    let mut par = Parallel::new(
        "par",
        vec![leaf("bad", Status::Failure), Box::new(Wait::new("w", 5))],
        None,
    );
    let mut bb = Blackboard::new();
    assert_eq!(par.tick(&ctx(1), &mut bb).unwrap(), Status::Failure);
}

#[test]
fn errors_are_attributed_to_the_innermost_node() {
    let mut fault: Box<dyn RuntimeNode> = Box::new(arbor_nodes::leaves::Fault::new("f", "boom"));
    fault.set_tag(NodeTag::new("n-fault"));
    let mut root = Sequence::new("root", vec![leaf("a", Status::Success), fault]);
    root.set_tag(NodeTag::new("n-root"));

    let err = root.tick(&ctx(1), &mut Blackboard::new()).unwrap_err();
    assert_eq!(err.message, "boom");
    assert_eq!(err.node, Some(NodeTag::new("n-fault")));
}

#[test]
fn behavior_tree_restarts_after_terminal_status() {
    let root = MemSequence::new("root", vec![Box::new(Wait::new("w", 2))]);
    let mut tree = BehaviorTree::new(Box::new(root));
    let mut bb = Blackboard::new();

    assert_eq!(tree.tick(&ctx(1), &mut bb).unwrap(), Status::Running);
    assert_eq!(tree.tick(&ctx(2), &mut bb).unwrap(), Status::Success);
    assert_eq!(tree.last_status(), Some(Status::Success));
    assert_eq!(tree.tick(&ctx(3), &mut bb).unwrap(), Status::Running);
    assert_eq!(tree.node_at(&[0]).and_then(|n| n.message()), Some("1/2 ticks"));
}
