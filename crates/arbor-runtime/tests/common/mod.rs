#![allow(dead_code)]

use std::time::Duration;

use arbor_runtime::kernel::SchedulerState;
use arbor_runtime::{ExecutionId, NodeDefinition, Runtime, RuntimeConfig};

pub fn node(node_type: &str) -> NodeDefinition {
    NodeDefinition::new(node_type)
}

pub fn leaf(node_type: &str, name: &str) -> NodeDefinition {
    NodeDefinition::new(node_type).named(name)
}

pub fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig::default())
}

pub fn runtime_with(edit: impl FnOnce(&mut RuntimeConfig)) -> Runtime {
    let mut config = RuntimeConfig::default();
    edit(&mut config);
    Runtime::new(config)
}

pub async fn tick_count(runtime: &Runtime, id: ExecutionId) -> u64 {
    runtime
        .with_instance(id, |i| i.tick_count())
        .await
        .expect("instance exists")
}

/// Poll until the scheduler reaches `state`, failing the test after a few seconds.
pub async fn wait_for_state(runtime: &Runtime, id: ExecutionId, state: SchedulerState) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = runtime.scheduler_status(id).await.expect("instance exists");
            if status.state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "scheduler never reached {state:?}");
}

pub async fn wait_for_ticks(runtime: &Runtime, id: ExecutionId, ticks: u64) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while tick_count(runtime, id).await < ticks {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "instance never reached tick {ticks}");
}
