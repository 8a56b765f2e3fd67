//! Scheduler - drives an instance's ticks from a background task.
//!
//! The state machine lives in the instance ([`SchedulerContext`]) so that scheduler-driven and
//! manual ticking are arbitrated under the same lock. The driving task only ever holds that
//! lock for one tick and re-checks the state before every tick.

use std::sync::Arc;
use std::time::Duration;

use arbor_core::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::runtime::InstanceHandle;
use crate::definition::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    Paused,
    Stopped,
    Error,
}

impl SchedulerState {
    /// Running or paused: a driving task owns the instance.
    pub fn is_active(self) -> bool {
        matches!(self, SchedulerState::Running | SchedulerState::Paused)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Tick back to back, yielding to the executor between ticks.
    AsFastAsPossible,
    /// Sleep between ticks. An interval of 0 uses the runtime's configured default.
    FixedInterval { interval_ms: u64 },
}

impl ScheduleMode {
    pub fn interval(interval: Duration) -> Self {
        ScheduleMode::FixedInterval {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {
    pub mode: ScheduleMode,
    pub max_ticks: Option<u64>,
    /// Stop once the root returns success or failure.
    pub stop_on_terminal: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::AsFastAsPossible,
            max_ticks: None,
            stop_on_terminal: false,
        }
    }
}

impl StartOptions {
    pub fn as_fast_as_possible() -> Self {
        Self::default()
    }

    pub fn fixed_interval(interval: Duration) -> Self {
        Self {
            mode: ScheduleMode::interval(interval),
            ..Self::default()
        }
    }

    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = Some(max_ticks);
        self
    }

    pub fn stop_on_terminal(mut self) -> Self {
        self.stop_on_terminal = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    MaxTicks,
    Terminal { status: Status },
    Error,
}

/// The tick error that moved the scheduler to [`SchedulerState::Error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerError {
    pub message: String,
    pub tick: u64,
    pub node_id: Option<NodeId>,
    pub path: Option<String>,
}

/// Scheduling state of one instance.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerContext {
    pub state: SchedulerState,
    pub mode: Option<ScheduleMode>,
    /// Incremented by every start; a driving task exits once its run is superseded.
    pub run: u64,
    /// Ticks executed during the current run.
    pub ticks_executed: u64,
    pub max_ticks: Option<u64>,
    pub stop_on_terminal: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<StopReason>,
    pub last_error: Option<SchedulerError>,
}

impl Default for SchedulerContext {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            mode: None,
            run: 0,
            ticks_executed: 0,
            max_ticks: None,
            stop_on_terminal: false,
            started_at: None,
            stopped_at: None,
            stop_reason: None,
            last_error: None,
        }
    }
}

impl SchedulerContext {
    /// Reset for a new run and return its number. The caller checks the state first.
    pub(crate) fn begin(&mut self, options: &StartOptions, default_interval: Duration) -> u64 {
        let mode = match options.mode {
            ScheduleMode::FixedInterval { interval_ms: 0 } => ScheduleMode::interval(default_interval),
            mode => mode,
        };
        self.run += 1;
        self.mode = Some(mode);
        self.ticks_executed = 0;
        self.max_ticks = options.max_ticks;
        self.stop_on_terminal = options.stop_on_terminal;
        self.started_at = Some(Utc::now());
        self.stopped_at = None;
        self.stop_reason = None;
        self.last_error = None;
        self.run
    }

    pub(crate) fn end(&mut self, reason: StopReason) {
        self.stopped_at = Some(Utc::now());
        self.stop_reason = Some(reason);
    }

    /// The run already executed its `max_ticks`. Checked before every tick, so a ceiling of 0
    /// runs nothing.
    pub(crate) fn ceiling_reached(&self) -> bool {
        self.max_ticks.is_some_and(|max| self.ticks_executed >= max)
    }

    /// Stop condition after a scheduled tick finished with `status`.
    pub(crate) fn stop_condition(&self, status: Status) -> Option<StopReason> {
        if self.ceiling_reached() {
            return Some(StopReason::MaxTicks);
        }
        if self.stop_on_terminal && status.is_terminal() {
            return Some(StopReason::Terminal { status });
        }
        None
    }

    pub(crate) fn delay(&self) -> Option<Duration> {
        match self.mode {
            Some(ScheduleMode::FixedInterval { interval_ms }) => {
                Some(Duration::from_millis(interval_ms))
            }
            _ => None,
        }
    }
}

/// What the driving loop does after one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopStep {
    /// A tick ran; wait this long (or just yield) before the next one.
    Ticked(Option<Duration>),
    /// Paused or awaiting a debug step; sleep until woken.
    Suspend,
    Exit,
}

/// Body of the driving task for run `run` of one instance.
pub(crate) async fn drive(handle: Arc<InstanceHandle>, run: u64) {
    tracing::debug!(execution_id = %handle.id, run, "scheduler loop started");
    loop {
        let step = handle.instance.lock().await.scheduled_step(run);
        match step {
            LoopStep::Exit => break,
            LoopStep::Suspend => handle.wake.notified().await,
            LoopStep::Ticked(None) => tokio::task::yield_now().await,
            LoopStep::Ticked(Some(interval)) => {
                let deadline = tokio::time::Instant::now() + interval;
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => break,
                        _ = handle.wake.notified() => {
                            // A stale wake-up must not shorten the interval.
                            if !handle.instance.lock().await.run_is_live(run) {
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
    tracing::debug!(execution_id = %handle.id, run, "scheduler loop exited");
}
