mod common;

use std::sync::Arc;

use arbor_runtime::{DefinitionStore, InMemoryStore, Runtime, RuntimeConfig, RuntimeError, TreeDefinition};
use common::{leaf, node};

#[tokio::test]
async fn versions_increase_and_latest_is_default() {
    let store = InMemoryStore::new();
    let v1 = TreeDefinition::new(leaf("Success", "v1")).with_name("guard");
    let v2 = TreeDefinition::new(leaf("Failure", "v2")).with_name("guard");

    assert_eq!(store.save("guard", &v1).await.unwrap(), 1);
    assert_eq!(store.save("guard", &v2).await.unwrap(), 2);
    assert_eq!(store.versions("guard").await.unwrap(), vec![1, 2]);

    assert_eq!(store.load("guard", None).await.unwrap(), v2);
    assert_eq!(store.load("guard", Some(1)).await.unwrap(), v1);
    assert!(matches!(
        store.load("guard", Some(7)).await,
        Err(RuntimeError::DefinitionNotFound { version: Some(7), .. })
    ));
    assert!(matches!(
        store.save(" ", &v1).await,
        Err(RuntimeError::Storage(_))
    ));
}

#[tokio::test]
async fn runtime_creates_instances_from_the_store() {
    let store = Arc::new(InMemoryStore::new());
    let def = TreeDefinition::new(node("Sequence").with_child(leaf("Success", "ok")));
    store.save("patrol", &def).await.unwrap();

    let runtime = Runtime::new(RuntimeConfig::default()).with_store(store);
    let id = runtime.create_from_store("patrol", None).await.unwrap();
    let result = runtime.tick(id, 1).await.unwrap();
    assert_eq!(result.status, Some(arbor_runtime::Status::Success));

    assert!(matches!(
        runtime.create_from_store("missing", None).await,
        Err(RuntimeError::DefinitionNotFound { .. })
    ));
}

#[tokio::test]
async fn create_from_store_needs_a_store() {
    let runtime = Runtime::new(RuntimeConfig::default());
    assert!(matches!(
        runtime.create_from_store("any", None).await,
        Err(RuntimeError::Storage(_))
    ));
}
