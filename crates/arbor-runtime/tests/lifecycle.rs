mod common;

use std::time::Duration;

use arbor_runtime::kernel::SchedulerState;
use arbor_runtime::{ExecutionId, RuntimeError, StartOptions, TreeDefinition};
use common::{leaf, runtime, runtime_with, wait_for_state};
use serde_json::json;

fn counter() -> TreeDefinition {
    TreeDefinition::new(leaf("Increment", "count").with_config("key", "n")).with_name("counter")
}

#[tokio::test]
async fn delete_stops_the_scheduler_and_forgets_the_instance() {
    let runtime = runtime();
    let id = runtime.create_instance(&counter()).await.unwrap();
    runtime.start(id, StartOptions::default()).await.unwrap();
    wait_for_state(&runtime, id, SchedulerState::Running).await;

    runtime.delete(id).await.unwrap();
    assert!(!runtime.contains(id).await);
    assert!(matches!(
        runtime.tick(id, 1).await,
        Err(RuntimeError::InstanceNotFound(missing)) if missing == id
    ));
    assert!(matches!(
        runtime.delete(id).await,
        Err(RuntimeError::InstanceNotFound(_))
    ));
    assert!(matches!(
        runtime.snapshot(ExecutionId::new()).await,
        Err(RuntimeError::InstanceNotFound(_))
    ));
}

#[tokio::test]
async fn list_summarizes_instances() {
    let runtime = runtime();
    let a = runtime.create_instance(&counter()).await.unwrap();
    let b = runtime.create_instance(&counter()).await.unwrap();
    runtime.tick(b, 3).await.unwrap();

    let summaries = runtime.list().await;
    assert_eq!(summaries.len(), 2);
    let sb = summaries.iter().find(|s| s.execution_id == b).unwrap();
    assert_eq!(sb.tick_count, 3);
    assert_eq!(sb.name.as_deref(), Some("counter"));
    assert_eq!(sb.node_count, 1);
    assert_eq!(sb.scheduler_state, SchedulerState::Idle);
    let sa = summaries.iter().find(|s| s.execution_id == a).unwrap();
    assert_eq!(sa.tick_count, 0);
    assert_eq!(sa.root_status, None);
}

#[tokio::test]
async fn cleanup_removes_only_idle_unscheduled_instances() {
    let runtime = runtime_with(|c| c.idle_timeout_secs = Some(0));
    let idle = runtime.create_instance(&counter()).await.unwrap();
    let busy = runtime.create_instance(&counter()).await.unwrap();
    runtime
        .start(busy, StartOptions::fixed_interval(Duration::from_millis(50)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let removed = runtime.cleanup_idle().await;
    assert_eq!(removed, vec![idle]);
    assert!(runtime.contains(busy).await);
    runtime.shutdown().await;
    assert!(runtime.list().await.is_empty());
}

#[tokio::test]
async fn cleanup_is_disabled_without_timeout() {
    let runtime = runtime();
    runtime.create_instance(&counter()).await.unwrap();
    assert!(runtime.cleanup_idle().await.is_empty());
}

#[tokio::test]
async fn store_values_can_be_seeded_and_read() {
    let runtime = runtime();
    let id = runtime.create_instance(&counter()).await.unwrap();
    runtime.set_store_value(id, "n", json!(40)).await.unwrap();
    runtime.tick(id, 2).await.unwrap();
    assert_eq!(runtime.store_value(id, "n").await.unwrap(), Some(json!(42)));
    assert_eq!(runtime.store_value(id, "other").await.unwrap(), None);

    let snapshot = runtime.snapshot(id).await.unwrap();
    assert_eq!(snapshot.store["n"], json!(42));
    assert!(snapshot.tip.is_none());
}
