//! Runtime - the registry of execution instances and the surface callers drive them through.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use arbor_nodes::NodeFactory;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

use super::debug::{BreakCondition, Breakpoint, BreakpointId, StepMode, Watch, WatchCondition, WatchId};
use super::scheduler::{drive, SchedulerContext, StartOptions, StopReason};
use crate::config::RuntimeConfig;
use crate::definition::{self, NodeId, TreeDefinition, ValidationReport};
use crate::error::{Result, RuntimeError};
use crate::execution::{
    ExecutionId, ExecutionInstance, InstanceSummary, Snapshot, SnapshotDiff, TickResult, TreeBuilder,
};
use crate::observability::{Event, EventFilter, EventStream, SubscriberId};
use crate::storage::DefinitionStore;

/// Shared handle onto one instance and its driving task.
pub(crate) struct InstanceHandle {
    pub(crate) id: ExecutionId,
    pub(crate) instance: Mutex<ExecutionInstance>,
    /// Wakes a suspended or sleeping driving task after a control change.
    pub(crate) wake: Notify,
    driver: StdMutex<Option<JoinHandle<()>>>,
}

impl InstanceHandle {
    fn new(instance: ExecutionInstance) -> Self {
        Self {
            id: instance.id(),
            instance: Mutex::new(instance),
            wake: Notify::new(),
            driver: StdMutex::new(None),
        }
    }

    fn replace_driver(&self, driver: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        match self.driver.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, driver),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), driver),
        }
    }
}

/// Owns every execution instance.
///
/// Instances are independent: each is locked separately, so different instances tick
/// concurrently while one instance never ticks twice at once.
pub struct Runtime {
    config: RuntimeConfig,
    factory: Arc<NodeFactory>,
    store: Option<Arc<dyn DefinitionStore>>,
    instances: RwLock<HashMap<ExecutionId, Arc<InstanceHandle>>>,
}

impl Runtime {
    /// A runtime with the built-in node types.
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_factory(config, NodeFactory::with_builtins())
    }

    pub fn with_factory(config: RuntimeConfig, factory: NodeFactory) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
            store: None,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a definition store for [`Runtime::create_from_store`].
    pub fn with_store(mut self, store: Arc<dyn DefinitionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn factory(&self) -> &NodeFactory {
        &self.factory
    }

    /// Check a definition against this runtime's factory without building it.
    pub fn validate(&self, definition: &TreeDefinition) -> ValidationReport {
        definition::validate(definition, Some(&self.factory), self.config.max_ref_depth)
    }

    /// Resolve, build and register a new instance.
    pub async fn create_instance(&self, definition: &TreeDefinition) -> Result<ExecutionId> {
        let resolved = definition::resolve(definition, self.config.max_ref_depth)?;
        let built = TreeBuilder::new(&self.factory, &self.config.unknown_node_policy).build(&resolved)?;

        let id = ExecutionId::new();
        let node_count = built.index.len();
        let instance = ExecutionInstance::new(
            id,
            resolved,
            definition.metadata.clone(),
            built,
            &self.config,
        );
        self.instances
            .write()
            .await
            .insert(id, Arc::new(InstanceHandle::new(instance)));

        tracing::info!(
            execution_id = %id,
            name = ?definition.metadata.name,
            nodes = node_count,
            "instance created"
        );
        Ok(id)
    }

    /// Load a definition from the attached store and create an instance from it.
    pub async fn create_from_store(&self, id: &str, version: Option<u64>) -> Result<ExecutionId> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| RuntimeError::Storage("no definition store attached".to_string()))?;
        let definition = store.load(id, version).await?;
        self.create_instance(&definition).await
    }

    async fn handle(&self, id: ExecutionId) -> Result<Arc<InstanceHandle>> {
        self.instances
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(RuntimeError::InstanceNotFound(id))
    }

    /// Run `f` with the instance locked.
    pub async fn with_instance<T>(
        &self,
        id: ExecutionId,
        f: impl FnOnce(&mut ExecutionInstance) -> T,
    ) -> Result<T> {
        let handle = self.handle(id).await?;
        let mut instance = handle.instance.lock().await;
        Ok(f(&mut instance))
    }

    pub async fn contains(&self, id: ExecutionId) -> bool {
        self.instances.read().await.contains_key(&id)
    }

    // ---- ticking -------------------------------------------------------

    /// Manually tick `count` times. Rejected with `SchedulerActive` while a scheduler runs.
    pub async fn tick(&self, id: ExecutionId, count: u64) -> Result<TickResult> {
        let handle = self.handle(id).await?;
        let mut instance = handle.instance.lock().await;
        instance.tick(count)
    }

    pub async fn snapshot(&self, id: ExecutionId) -> Result<Arc<Snapshot>> {
        self.with_instance(id, |i| i.snapshot()).await
    }

    pub async fn set_store_value(
        &self,
        id: ExecutionId,
        key: impl Into<String>,
        value: Value,
    ) -> Result<()> {
        let key = key.into();
        self.with_instance(id, move |i| i.set_store_value(key, value))
            .await
    }

    pub async fn store_value(&self, id: ExecutionId, key: &str) -> Result<Option<Value>> {
        self.with_instance(id, |i| i.store_value(key).cloned()).await
    }

    // ---- scheduling ----------------------------------------------------

    pub async fn start(&self, id: ExecutionId, options: StartOptions) -> Result<()> {
        let handle = self.handle(id).await?;
        let mut instance = handle.instance.lock().await;
        let run = instance.begin_run(&options)?;
        let task = tokio::spawn(drive(handle.clone(), run));
        // Swapped under the instance lock so `stop` always awaits the run it stopped.
        let _previous = handle.replace_driver(Some(task));
        Ok(())
    }

    pub async fn pause(&self, id: ExecutionId) -> Result<()> {
        let handle = self.handle(id).await?;
        if handle.instance.lock().await.pause_run()? {
            handle.wake.notify_one();
        }
        Ok(())
    }

    pub async fn resume(&self, id: ExecutionId) -> Result<()> {
        let handle = self.handle(id).await?;
        if handle.instance.lock().await.resume_run()? {
            handle.wake.notify_one();
        }
        Ok(())
    }

    /// Stop the scheduler and wait for its task to exit. Stopping an inactive scheduler is a
    /// no-op.
    pub async fn stop(&self, id: ExecutionId) -> Result<SchedulerContext> {
        let handle = self.handle(id).await?;
        stop_driver(&handle, false).await;
        let instance = handle.instance.lock().await;
        Ok(instance.scheduler().clone())
    }

    pub async fn scheduler_status(&self, id: ExecutionId) -> Result<SchedulerContext> {
        self.with_instance(id, |i| i.scheduler().clone()).await
    }

    // ---- events --------------------------------------------------------

    pub async fn subscribe(&self, id: ExecutionId, filter: EventFilter) -> Result<EventStream> {
        self.with_instance(id, |i| i.emitter_mut().subscribe(filter))
            .await
    }

    /// Subscribe a callback run inline with emission. It must not call back into this runtime
    /// for the same instance.
    pub async fn subscribe_with<F>(
        &self,
        id: ExecutionId,
        filter: EventFilter,
        callback: F,
    ) -> Result<SubscriberId>
    where
        F: Fn(&Event) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.with_instance(id, |i| i.emitter_mut().subscribe_with(filter, callback))
            .await
    }

    pub async fn subscribe_deferred<F>(
        &self,
        id: ExecutionId,
        filter: EventFilter,
        callback: F,
    ) -> Result<SubscriberId>
    where
        F: Fn(&Event) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.with_instance(id, |i| i.emitter_mut().subscribe_deferred(filter, callback))
            .await
    }

    pub async fn unsubscribe(&self, id: ExecutionId, subscriber: SubscriberId) -> Result<bool> {
        self.with_instance(id, |i| i.emitter_mut().unsubscribe(subscriber))
            .await
    }

    // ---- history -------------------------------------------------------

    pub async fn history(&self, id: ExecutionId, tick: u64) -> Result<Arc<Snapshot>> {
        self.with_instance(id, |i| i.history().get(tick)).await?
    }

    pub async fn history_range(
        &self,
        id: ExecutionId,
        from: u64,
        to: u64,
    ) -> Result<Vec<Arc<Snapshot>>> {
        self.with_instance(id, |i| i.history().range(from, to)).await
    }

    pub async fn diff(&self, id: ExecutionId, from: u64, to: u64) -> Result<SnapshotDiff> {
        self.with_instance(id, |i| i.history().diff(from, to)).await?
    }

    pub async fn clear_history(&self, id: ExecutionId) -> Result<()> {
        self.with_instance(id, |i| i.history_mut().clear()).await
    }

    // ---- debugging -----------------------------------------------------

    pub async fn add_breakpoint(
        &self,
        id: ExecutionId,
        node_id: NodeId,
        condition: Option<BreakCondition>,
    ) -> Result<BreakpointId> {
        self.with_instance(id, |i| -> Result<BreakpointId> {
            if !i.index().contains(&node_id) {
                return Err(RuntimeError::NodeNotFound(node_id));
            }
            Ok(i.debug_mut()?.add_breakpoint(node_id, condition))
        })
        .await?
    }

    pub async fn remove_breakpoint(&self, id: ExecutionId, breakpoint: BreakpointId) -> Result<()> {
        self.with_instance(id, |i| -> Result<()> {
            i.debug_mut()?
                .remove_breakpoint(breakpoint)
                .map(|_| ())
                .ok_or(RuntimeError::BreakpointNotFound(breakpoint))
        })
        .await?
    }

    pub async fn set_breakpoint_enabled(
        &self,
        id: ExecutionId,
        breakpoint: BreakpointId,
        enabled: bool,
    ) -> Result<()> {
        self.with_instance(id, |i| -> Result<()> {
            if i.debug_mut()?.set_breakpoint_enabled(breakpoint, enabled) {
                Ok(())
            } else {
                Err(RuntimeError::BreakpointNotFound(breakpoint))
            }
        })
        .await?
    }

    pub async fn breakpoints(&self, id: ExecutionId) -> Result<Vec<Breakpoint>> {
        self.with_instance(id, |i| -> Result<Vec<Breakpoint>> {
            Ok(i.debug_mut()?.breakpoints().cloned().collect())
        })
        .await?
    }

    pub async fn add_watch(
        &self,
        id: ExecutionId,
        key: impl Into<String>,
        condition: WatchCondition,
    ) -> Result<WatchId> {
        let key = key.into();
        self.with_instance(id, move |i| -> Result<WatchId> {
            let current = i.store_value(&key).cloned();
            Ok(i.debug_mut()?.add_watch(key, condition, current.as_ref()))
        })
        .await?
    }

    pub async fn remove_watch(&self, id: ExecutionId, watch: WatchId) -> Result<()> {
        self.with_instance(id, |i| -> Result<()> {
            i.debug_mut()?
                .remove_watch(watch)
                .map(|_| ())
                .ok_or(RuntimeError::WatchNotFound(watch))
        })
        .await?
    }

    pub async fn set_watch_enabled(&self, id: ExecutionId, watch: WatchId, enabled: bool) -> Result<()> {
        self.with_instance(id, |i| -> Result<()> {
            if i.debug_mut()?.set_watch_enabled(watch, enabled) {
                Ok(())
            } else {
                Err(RuntimeError::WatchNotFound(watch))
            }
        })
        .await?
    }

    pub async fn watches(&self, id: ExecutionId) -> Result<Vec<Watch>> {
        self.with_instance(id, |i| -> Result<Vec<Watch>> {
            Ok(i.debug_mut()?.watches().cloned().collect())
        })
        .await?
    }

    /// Step execution.
    ///
    /// With an active scheduler the step is granted to the driving task and `None` is returned.
    /// Without one, `Over` and `Ticks(n)` tick manually and return the result.
    pub async fn step(&self, id: ExecutionId, mode: StepMode) -> Result<Option<TickResult>> {
        let handle = self.handle(id).await?;
        let mut instance = handle.instance.lock().await;
        instance.ensure_open()?;

        if instance.scheduler().state.is_active() {
            match mode {
                StepMode::Continue => {
                    instance.debug_mut()?.resume();
                    instance.resume_run()?;
                }
                StepMode::Over => instance.grant_steps(1)?,
                StepMode::Ticks(n) => instance.grant_steps(n)?,
            }
            drop(instance);
            handle.wake.notify_one();
            return Ok(None);
        }

        match mode {
            StepMode::Continue => {
                instance.debug_mut()?.resume();
                Ok(None)
            }
            StepMode::Over => instance.tick(1).map(Some),
            StepMode::Ticks(n) => instance.tick(u64::from(n.max(1))).map(Some),
        }
    }

    // ---- lifecycle -----------------------------------------------------

    /// Stop the instance's scheduler, then drop the instance.
    pub async fn delete(&self, id: ExecutionId) -> Result<()> {
        let handle = self
            .instances
            .write()
            .await
            .remove(&id)
            .ok_or(RuntimeError::InstanceNotFound(id))?;
        stop_driver(&handle, true).await;
        drop(handle);
        tracing::info!(execution_id = %id, "instance deleted");
        Ok(())
    }

    pub async fn list(&self) -> Vec<InstanceSummary> {
        let handles: Vec<Arc<InstanceHandle>> =
            self.instances.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.instance.lock().await.summary());
        }
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    /// Delete instances that are not scheduled and have been inactive longer than the configured
    /// idle timeout. Returns the deleted ids.
    pub async fn cleanup_idle(&self) -> Vec<ExecutionId> {
        let Some(timeout) = self.config.idle_timeout() else {
            return Vec::new();
        };
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - timeout;

        let candidates: Vec<Arc<InstanceHandle>> =
            self.instances.read().await.values().cloned().collect();
        let mut removed = Vec::new();
        for candidate in candidates {
            if !candidate.instance.lock().await.is_idle_since(cutoff) {
                continue;
            }
            // Re-check under the registry write lock so a concurrent start or tick wins.
            let mut instances = self.instances.write().await;
            let closed = {
                let mut instance = candidate.instance.lock().await;
                if instance.is_idle_since(cutoff) {
                    instance.close();
                    true
                } else {
                    false
                }
            };
            if closed {
                instances.remove(&candidate.id);
                removed.push(candidate.id);
            }
        }
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "removed idle instances");
        }
        removed
    }

    /// Stop every scheduler and drop every instance.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<InstanceHandle>> =
            self.instances.write().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            stop_driver(&handle, true).await;
        }
    }
}

/// Stop the handle's run and await its task. With `close`, the instance also refuses every
/// later start or tick, so a caller that looked the handle up before removal cannot revive it.
async fn stop_driver(handle: &InstanceHandle, close: bool) {
    let (stopped, driver) = {
        let mut instance = handle.instance.lock().await;
        let stopped = instance.stop_run(StopReason::Requested);
        if close {
            instance.close();
        }
        (stopped, handle.replace_driver(None))
    };
    if stopped {
        handle.wake.notify_one();
    }
    if let Some(driver) = driver {
        if let Err(err) = driver.await {
            tracing::warn!(execution_id = %handle.id, error = %err, "scheduler task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::definition::NodeDefinition;
    use crate::kernel::{LoopStep, SchedulerState};

    fn counter() -> TreeDefinition {
        TreeDefinition::new(NodeDefinition::new("Increment").with_config("key", "n"))
    }

    #[tokio::test]
    async fn handle_held_across_delete_cannot_be_restarted() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let id = runtime.create_instance(&counter()).await.unwrap();
        let handle = runtime.handle(id).await.unwrap();

        runtime.delete(id).await.unwrap();

        let mut instance = handle.instance.lock().await;
        assert!(instance.is_closed());
        assert!(matches!(
            instance.begin_run(&StartOptions::default()),
            Err(RuntimeError::InstanceNotFound(missing)) if missing == id
        ));
        assert!(matches!(
            instance.tick(1),
            Err(RuntimeError::InstanceNotFound(_))
        ));
        assert_eq!(instance.tick_count(), 0);
        let run = instance.scheduler().run;
        assert_eq!(instance.scheduled_step(run), LoopStep::Exit);
    }

    #[tokio::test]
    async fn delete_racing_a_start_leaves_no_driver_behind() {
        let runtime = Arc::new(Runtime::new(RuntimeConfig::default()));
        let id = runtime.create_instance(&counter()).await.unwrap();
        let handle = runtime.handle(id).await.unwrap();

        let starter = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.start(id, StartOptions::default()).await })
        };
        runtime.delete(id).await.unwrap();
        let _ = starter.await.unwrap();

        let ticks_after_delete = handle.instance.lock().await.tick_count();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let instance = handle.instance.lock().await;
        assert_eq!(instance.tick_count(), ticks_after_delete);
        assert!(!instance.scheduler().state.is_active());
        assert!(!runtime.contains(id).await);
    }

    #[tokio::test]
    async fn cleanup_closes_what_it_removes() {
        let mut config = RuntimeConfig::default();
        config.idle_timeout_secs = Some(0);
        let runtime = Runtime::new(config);
        let id = runtime.create_instance(&counter()).await.unwrap();
        let handle = runtime.handle(id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(runtime.cleanup_idle().await, vec![id]);
        let mut instance = handle.instance.lock().await;
        assert!(matches!(
            instance.begin_run(&StartOptions::default()),
            Err(RuntimeError::InstanceNotFound(_))
        ));
        assert_eq!(instance.scheduler().state, SchedulerState::Idle);
    }
}
