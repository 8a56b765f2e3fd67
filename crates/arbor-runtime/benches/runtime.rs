use arbor_runtime::definition::{self, NodeDefinition, TreeDefinition};
use arbor_runtime::{Runtime, RuntimeConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn wide_tree(width: usize) -> TreeDefinition {
    let children = (0..width)
        .map(|i| NodeDefinition::new("Increment").named(format!("inc{i}")).with_config("key", format!("k{i}")))
        .collect::<Vec<_>>();
    let branch = NodeDefinition::new("Sequence").with_children(children);
    TreeDefinition::new(NodeDefinition::new("Selector").with_child(NodeDefinition::reference("branch")))
        .with_subtree("branch", branch)
}

fn bench_resolve(c: &mut Criterion) {
    let def = wide_tree(64);
    c.bench_function("arbor-runtime/resolve(width=64)", |b| {
        b.iter(|| black_box(definition::resolve(&def, 100).ok()))
    });
}

fn bench_instance_tick(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    let runtime = Runtime::new(RuntimeConfig {
        history_capacity: 64,
        ..RuntimeConfig::default()
    });
    let id = rt
        .block_on(runtime.create_instance(&wide_tree(32)))
        .expect("instance");

    c.bench_function("arbor-runtime/tick(width=32)", |b| {
        b.iter(|| black_box(rt.block_on(runtime.tick(id, 1)).ok()))
    });
}

criterion_group!(benches, bench_resolve, bench_instance_tick);
criterion_main!(benches);
