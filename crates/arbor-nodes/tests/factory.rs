use arbor_core::{Blackboard, Status, TickContext};
use arbor_nodes::leaves::Constant;
use arbor_nodes::{Config, FactoryError, NodeFactory, NodeKind, RuntimeNode};
use serde_json::json;

fn config(pairs: &[(&str, serde_json::Value)]) -> Config {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn build_leaf(factory: &NodeFactory, type_name: &str, cfg: Config) -> Box<dyn RuntimeNode> {
    factory.create(type_name, type_name, &cfg, Vec::new()).unwrap()
}

#[test]
fn unknown_type_fails_closed() {
    let factory = NodeFactory::with_builtins();
    let err = factory
        .create("Teleport", "t", &Config::new(), Vec::new())
        .err()
        .unwrap();
    assert!(matches!(err, FactoryError::UnknownType { ref type_name } if type_name == "Teleport"));
}

#[test]
fn arity_is_checked_before_construction() {
    let factory = NodeFactory::with_builtins();
    let child = build_leaf(&factory, "Success", Config::new());
    let err = factory
        .create("Wait", "w", &Config::new(), vec![child])
        .err()
        .unwrap();
    assert!(matches!(err, FactoryError::Arity { actual: 1, .. }));

    let err = factory
        .create("Inverter", "inv", &Config::new(), Vec::new())
        .err()
        .unwrap();
    assert!(matches!(err, FactoryError::Arity { expected: "exactly 1", .. }));
}

#[test]
fn invalid_config_is_reported_with_key() {
    let factory = NodeFactory::with_builtins();
    let err = factory
        .create("Wait", "w", &config(&[("ticks", json!("soon"))]), Vec::new())
        .err()
        .unwrap();
    assert!(matches!(err, FactoryError::InvalidConfig { ref key, .. } if key == "ticks"));
}

#[test]
fn store_leaves_read_and_write_the_blackboard() {
    let factory = NodeFactory::with_builtins();
    let mut bb = Blackboard::new();
    let ctx = TickContext::new(1, 0);

    let mut inc = build_leaf(&factory, "Increment", config(&[("key", json!("n")), ("by", json!(2))]));
    inc.tick(&ctx, &mut bb).unwrap();
    inc.tick(&ctx, &mut bb).unwrap();
    assert_eq!(bb.peek("n"), Some(&json!(4)));

    let mut check = build_leaf(
        &factory,
        "CheckKey",
        config(&[("key", json!("n")), ("op", json!("gt")), ("value", json!(3))]),
    );
    assert_eq!(check.tick(&ctx, &mut bb).unwrap(), Status::Success);
    assert_eq!(check.message(), Some("n = 4"));

    let mut set = build_leaf(&factory, "SetKey", config(&[("key", json!("flag")), ("value", json!(true))]));
    set.tick(&ctx, &mut bb).unwrap();
    assert_eq!(bb.peek("flag"), Some(&json!(true)));
}

#[test]
fn repeat_consumes_one_iteration_per_tick() {
    let factory = NodeFactory::with_builtins();
    let child = build_leaf(&factory, "Success", Config::new());
    let mut repeat = factory
        .create("Repeat", "r", &config(&[("count", json!(3))]), vec![child])
        .unwrap();
    let mut bb = Blackboard::new();

    let statuses: Vec<Status> = (1..=3)
        .map(|t| repeat.tick(&TickContext::new(t, 0), &mut bb).unwrap())
        .collect();
    assert_eq!(statuses, vec![Status::Running, Status::Running, Status::Success]);
}

#[test]
fn random_is_deterministic_for_a_seed() {
    let factory = NodeFactory::with_builtins();
    let cfg = config(&[("probability", json!(0.5))]);
    let mut a = build_leaf(&factory, "Random", cfg.clone());
    let mut b = build_leaf(&factory, "Random", cfg);
    let mut bb = Blackboard::new();
    for tick in 1..50 {
        let ctx = TickContext::new(tick, 99);
        assert_eq!(a.tick(&ctx, &mut bb).unwrap(), b.tick(&ctx, &mut bb).unwrap());
    }
}

#[test]
fn custom_types_are_additive() {
    let mut factory = NodeFactory::new();
    factory.register("Idle", NodeKind::Leaf, |spec| {
        Ok(Box::new(Constant::new(spec.name, Status::Running)))
    });
    assert_eq!(factory.kind("Idle"), Some(NodeKind::Leaf));
    assert!(!factory.contains("Sequence"));

    let mut node = factory.create("Idle", "idle", &Config::new(), Vec::new()).unwrap();
    assert_eq!(
        node.tick(&TickContext::new(1, 0), &mut Blackboard::new()).unwrap(),
        Status::Running
    );
    assert_eq!(node.state().name, "idle");
}

#[test]
fn increment_past_i64_range_continues_as_float() {
    let factory = NodeFactory::with_builtins();
    let mut up = build_leaf(&factory, "Increment", config(&[("key", json!("n"))]));
    let mut bb = Blackboard::new();
    bb.set_value("n", json!(i64::MAX));

    assert_eq!(up.tick(&TickContext::new(1, 0), &mut bb).unwrap(), Status::Success);
    let n = bb.get_value("n").unwrap();
    assert!(n.is_f64(), "{n}");
    assert!(n.as_f64().unwrap() >= i64::MAX as f64);

    let mut down = build_leaf(
        &factory,
        "Increment",
        config(&[("key", json!("m")), ("by", json!(-1))]),
    );
    bb.set_value("m", json!(i64::MIN));
    assert_eq!(down.tick(&TickContext::new(2, 0), &mut bb).unwrap(), Status::Success);
    assert!(bb.get_value("m").unwrap().is_f64());

    bb.set_value("k", json!(40));
    let mut small = build_leaf(
        &factory,
        "Increment",
        config(&[("key", json!("k")), ("by", json!(2))]),
    );
    small.tick(&TickContext::new(3, 0), &mut bb).unwrap();
    assert_eq!(bb.get_value("k"), Some(&json!(42)));
}
