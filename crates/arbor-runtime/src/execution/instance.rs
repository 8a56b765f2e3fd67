//! Execution instance - one runtime tree, its store, and everything observing it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arbor_core::{Blackboard, Status, TickContext};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::builder::{BuiltTree, NodeIndex};
use super::snapshot::{Snapshot, StoreDelta};
use super::ExecutionId;
use crate::config::RuntimeConfig;
use crate::definition::{NodeDefinition, NodeId, TreeMetadata};
use crate::error::{Result, RuntimeError};
use crate::kernel::{
    DebugController, Gate, LoopStep, PostTick, SchedulerContext, SchedulerError, SchedulerState,
    StartOptions, StopReason,
};
use crate::observability::{Event, EventEmitter, HistoryStore};

/// Who asked for a tick. Only scheduled ticks pass through the debug gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOrigin {
    Manual,
    Scheduler,
}

/// Result of one tick that actually ran.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub status: Status,
    pub snapshot: Arc<Snapshot>,
    pub breakpoint_hit: bool,
}

/// Result of a manual `tick(count)` call.
#[derive(Debug, Clone)]
pub struct TickResult {
    /// Root status after the last tick, `None` if no tick ran.
    pub status: Option<Status>,
    pub tick_count: u64,
    pub ticks_run: u64,
    pub snapshot: Option<Arc<Snapshot>>,
    /// The run stopped early because a breakpoint hit.
    pub breakpoint_hit: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub execution_id: ExecutionId,
    pub name: Option<String>,
    pub node_count: usize,
    pub tick_count: u64,
    pub root_status: Option<Status>,
    pub scheduler_state: SchedulerState,
    pub subscribers: usize,
    pub history_len: usize,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

pub struct ExecutionInstance {
    id: ExecutionId,
    definition: NodeDefinition,
    metadata: TreeMetadata,
    built: BuiltTree,
    store: Blackboard,
    tick_count: u64,
    seed: u64,
    default_interval: Duration,
    emitter: EventEmitter,
    history: HistoryStore,
    debug: Option<DebugController>,
    schedule: SchedulerContext,
    last_snapshot: Option<Arc<Snapshot>>,
    last_tick_at: Option<Instant>,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    /// Set once the instance has left the registry; nothing may tick it afterwards.
    closed: bool,
}

impl ExecutionInstance {
    pub fn new(
        id: ExecutionId,
        definition: NodeDefinition,
        metadata: TreeMetadata,
        built: BuiltTree,
        config: &RuntimeConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            definition,
            metadata,
            built,
            store: Blackboard::new(),
            tick_count: 0,
            seed: config.seed,
            default_interval: config.default_interval(),
            emitter: EventEmitter::new(id),
            history: HistoryStore::new(id, config.history_capacity),
            debug: config.debug_enabled.then(DebugController::new),
            schedule: SchedulerContext::default(),
            last_snapshot: None,
            last_tick_at: None,
            created_at: now,
            last_active_at: now,
            closed: false,
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    /// The resolved definition the tree was built from.
    pub fn definition(&self) -> &NodeDefinition {
        &self.definition
    }

    pub fn metadata(&self) -> &TreeMetadata {
        &self.metadata
    }

    pub fn index(&self) -> &NodeIndex {
        &self.built.index
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn store(&self) -> &Blackboard {
        &self.store
    }

    pub fn store_value(&self, key: &str) -> Option<&Value> {
        self.store.peek(key)
    }

    /// Seed or overwrite a store entry between ticks. Not reported as a tick delta.
    pub fn set_store_value(&mut self, key: impl Into<String>, value: Value) {
        self.store.set_value(key, value);
        self.store.take_access();
        self.touch();
    }

    pub fn emitter_mut(&mut self) -> &mut EventEmitter {
        &mut self.emitter
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryStore {
        &mut self.history
    }

    pub fn debug(&self) -> Option<&DebugController> {
        self.debug.as_ref()
    }

    pub fn debug_mut(&mut self) -> Result<&mut DebugController> {
        let id = self.id;
        self.debug.as_mut().ok_or(RuntimeError::DebugDisabled(id))
    }

    pub fn scheduler(&self) -> &SchedulerContext {
        &self.schedule
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop any run and refuse every later tick or start.
    pub(crate) fn close(&mut self) {
        self.stop_run(StopReason::Requested);
        self.closed = true;
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(RuntimeError::InstanceNotFound(self.id));
        }
        Ok(())
    }

    /// Not scheduled and untouched since `cutoff`.
    pub(crate) fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        !self.closed && !self.schedule.state.is_active() && self.last_active_at < cutoff
    }

    fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    /// Latest snapshot, or a fresh capture when nothing has ticked yet.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        match &self.last_snapshot {
            Some(snapshot) => snapshot.clone(),
            None => Arc::new(Snapshot::capture(
                self.id,
                self.tick_count,
                &self.built.tree,
                &self.built.index,
                &self.store,
            )),
        }
    }

    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            execution_id: self.id,
            name: self.metadata.name.clone(),
            node_count: self.built.index.len(),
            tick_count: self.tick_count,
            root_status: self.built.tree.last_status(),
            scheduler_state: self.schedule.state,
            subscribers: self.emitter.subscriber_count(),
            history_len: self.history.count(),
            created_at: self.created_at,
            last_active_at: self.last_active_at,
        }
    }

    /// Manually run up to `count` ticks.
    ///
    /// Rejected while a scheduler is running. Stops early when a breakpoint hits or a tick fails.
    pub fn tick(&mut self, count: u64) -> Result<TickResult> {
        self.ensure_open()?;
        if self.schedule.state == SchedulerState::Running {
            return Err(RuntimeError::SchedulerActive(self.id));
        }

        let mut result = TickResult {
            status: self.built.tree.last_status(),
            tick_count: self.tick_count,
            ticks_run: 0,
            snapshot: self.last_snapshot.clone(),
            breakpoint_hit: false,
        };
        for _ in 0..count {
            let Some(outcome) = self.tick_once(TickOrigin::Manual)? else {
                break;
            };
            result.status = Some(outcome.status);
            result.tick_count = self.tick_count;
            result.ticks_run += 1;
            result.snapshot = Some(outcome.snapshot);
            if outcome.breakpoint_hit {
                result.breakpoint_hit = true;
                break;
            }
        }
        Ok(result)
    }

    /// Run one tick through the full hook pipeline. `Ok(None)` means the debug gate held it.
    pub(crate) fn tick_once(&mut self, origin: TickOrigin) -> Result<Option<TickOutcome>> {
        if origin == TickOrigin::Scheduler {
            if let Some(debug) = self.debug.as_mut() {
                if debug.pre_tick() == Gate::Wait {
                    return Ok(None);
                }
            }
        }

        let tick = self.tick_count + 1;
        self.tick_count = tick;
        self.touch();
        self.emitter.emit(Event::TickStart {
            execution_id: self.id,
            tick,
            timestamp: Utc::now(),
        });

        let now = Instant::now();
        let dt = self
            .last_tick_at
            .map(|last| now.duration_since(last).as_secs_f32())
            .unwrap_or_default();
        self.last_tick_at = Some(now);
        let ctx = TickContext::new(tick, self.seed).with_dt(dt);

        let result = self.built.tree.tick(&ctx, &mut self.store);
        let access = self.store.take_access();
        let status = match result {
            Ok(status) => status,
            Err(err) => return Err(self.report_tick_error(tick, err)),
        };

        let snapshot = Arc::new(Snapshot::capture(
            self.id,
            tick,
            &self.built.tree,
            &self.built.index,
            &self.store,
        ));
        let post = match self.debug.as_mut() {
            Some(debug) => debug.post_tick(&snapshot),
            None => PostTick::default(),
        };
        self.history.add(snapshot.clone());

        let previous = self.last_snapshot.replace(snapshot.clone());
        for info in self.built.index.iter() {
            let before = previous.as_ref().and_then(|p| p.status_of(&info.id));
            let after = snapshot.status_of(&info.id);
            if before != after {
                self.emitter.emit(Event::NodeStatusChanged {
                    execution_id: self.id,
                    tick,
                    node_id: info.id.clone(),
                    from: before,
                    to: after,
                });
            }
        }

        let breakpoint_hit = !post.hits.is_empty();
        for hit in post.hits {
            tracing::info!(
                execution_id = %self.id,
                tick,
                node_id = %hit.node_id,
                breakpoint = hit.breakpoint_id,
                "breakpoint hit"
            );
            self.emitter.emit(Event::BreakpointHit {
                execution_id: self.id,
                tick,
                breakpoint_id: hit.breakpoint_id,
                node_id: hit.node_id,
                status: hit.status,
            });
        }
        for trigger in post.triggers {
            self.emitter.emit(Event::WatchTriggered {
                execution_id: self.id,
                tick,
                watch_id: trigger.watch_id,
                key: trigger.key,
                previous: trigger.previous,
                current: trigger.current,
            });
        }

        self.emitter.emit(Event::TickComplete {
            execution_id: self.id,
            tick,
            status,
            store_delta: StoreDelta::from_access(&access, &self.store),
            timestamp: Utc::now(),
        });
        tracing::debug!(execution_id = %self.id, tick, status = %status, "tick complete");

        Ok(Some(TickOutcome {
            status,
            snapshot,
            breakpoint_hit,
        }))
    }

    fn report_tick_error(&mut self, tick: u64, err: arbor_nodes::NodeError) -> RuntimeError {
        let node_id = err
            .node
            .as_ref()
            .map(|tag| NodeId::new(tag.as_str()))
            .or_else(|| self.built.index.root().map(|root| root.id.clone()));
        let path = node_id
            .as_ref()
            .and_then(|id| self.built.index.get(id))
            .map(|info| info.display_path.clone());

        tracing::error!(
            execution_id = %self.id,
            tick,
            node_id = ?node_id,
            path = ?path,
            error = %err.message,
            "tick failed"
        );
        self.emitter.emit(Event::ExecutionError {
            execution_id: self.id,
            tick,
            node_id: node_id.clone(),
            path: path.clone(),
            message: err.message.clone(),
        });

        RuntimeError::TickError {
            tick,
            node_id: node_id.unwrap_or_else(|| NodeId::new("")),
            path: path.unwrap_or_default(),
            message: err.message,
        }
    }

    fn transition(&mut self, to: SchedulerState) {
        let from = self.schedule.state;
        if from == to {
            return;
        }
        self.schedule.state = to;
        tracing::info!(execution_id = %self.id, ?from, ?to, "scheduler state changed");
        self.emitter.emit(Event::SchedulerStateChanged {
            execution_id: self.id,
            tick: self.tick_count,
            from,
            to,
        });
    }

    fn invalid(&self, action: &'static str) -> RuntimeError {
        RuntimeError::InvalidTransition {
            id: self.id,
            state: self.schedule.state,
            action,
        }
    }

    /// Enter Running for a new run and return the run number the driving task must carry.
    pub(crate) fn begin_run(&mut self, options: &StartOptions) -> Result<u64> {
        self.ensure_open()?;
        if self.schedule.state.is_active() {
            return Err(RuntimeError::SchedulerActive(self.id));
        }
        let run = self.schedule.begin(options, self.default_interval);
        if let Some(debug) = self.debug.as_mut() {
            debug.resume();
        }
        tracing::info!(
            execution_id = %self.id,
            run,
            mode = ?self.schedule.mode,
            max_ticks = ?options.max_ticks,
            "scheduler started"
        );
        self.transition(SchedulerState::Running);
        Ok(run)
    }

    /// Returns whether the state changed.
    pub(crate) fn pause_run(&mut self) -> Result<bool> {
        match self.schedule.state {
            SchedulerState::Running => {
                self.transition(SchedulerState::Paused);
                Ok(true)
            }
            SchedulerState::Paused => Ok(false),
            _ => Err(self.invalid("pause")),
        }
    }

    /// Returns whether the state changed.
    pub(crate) fn resume_run(&mut self) -> Result<bool> {
        match self.schedule.state {
            SchedulerState::Paused => {
                if let Some(debug) = self.debug.as_mut() {
                    debug.resume();
                }
                self.transition(SchedulerState::Running);
                Ok(true)
            }
            SchedulerState::Running => Ok(false),
            _ => Err(self.invalid("resume")),
        }
    }

    /// Stop an active run. Returns whether one was active.
    pub(crate) fn stop_run(&mut self, reason: StopReason) -> bool {
        if !self.schedule.state.is_active() {
            return false;
        }
        self.schedule.end(reason);
        tracing::info!(
            execution_id = %self.id,
            ticks = self.schedule.ticks_executed,
            ?reason,
            "scheduler stopped"
        );
        self.transition(SchedulerState::Stopped);
        true
    }

    /// Grant scheduled ticks while a run is active: pauses a running scheduler after them.
    pub(crate) fn grant_steps(&mut self, ticks: u32) -> Result<()> {
        self.debug_mut()?.step(crate::kernel::StepMode::Ticks(ticks));
        if self.schedule.state == SchedulerState::Running {
            self.transition(SchedulerState::Paused);
        }
        Ok(())
    }

    /// Whether run `run` is still the current one and free to tick.
    pub(crate) fn run_is_live(&self, run: u64) -> bool {
        !self.closed && self.schedule.run == run && self.schedule.state == SchedulerState::Running
    }

    /// One pass of the driving loop for run `run`.
    pub(crate) fn scheduled_step(&mut self, run: u64) -> LoopStep {
        if self.closed || self.schedule.run != run {
            return LoopStep::Exit;
        }
        match self.schedule.state {
            SchedulerState::Running => {}
            SchedulerState::Paused => {
                if !self.debug.as_ref().is_some_and(DebugController::has_granted_step) {
                    return LoopStep::Suspend;
                }
            }
            _ => return LoopStep::Exit,
        }
        if self.schedule.ceiling_reached() {
            self.stop_run(StopReason::MaxTicks);
            return LoopStep::Exit;
        }

        match self.tick_once(TickOrigin::Scheduler) {
            Ok(None) => {
                // Debug controller holds ticks while the scheduler believed it was running.
                self.transition(SchedulerState::Paused);
                LoopStep::Suspend
            }
            Ok(Some(outcome)) => {
                self.schedule.ticks_executed += 1;
                if outcome.breakpoint_hit {
                    self.transition(SchedulerState::Paused);
                }
                if let Some(reason) = self.schedule.stop_condition(outcome.status) {
                    self.stop_run(reason);
                    return LoopStep::Exit;
                }
                LoopStep::Ticked(self.schedule.delay())
            }
            Err(err) => {
                let (tick, node_id, path) = match &err {
                    RuntimeError::TickError {
                        tick, node_id, path, ..
                    } => (*tick, Some(node_id.clone()), Some(path.clone())),
                    _ => (self.tick_count, None, None),
                };
                self.schedule.last_error = Some(SchedulerError {
                    message: err.to_string(),
                    tick,
                    node_id,
                    path,
                });
                self.schedule.end(StopReason::Error);
                self.transition(SchedulerState::Error);
                LoopStep::Exit
            }
        }
    }
}
