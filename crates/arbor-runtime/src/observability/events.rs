//! Execution events and the per-instance emitter.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use arbor_core::Status;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::definition::NodeId;
use crate::error::RuntimeError;
use crate::execution::{ExecutionId, StoreDelta};
use crate::kernel::SchedulerState;

pub type SubscriberId = u64;

/// Something observable that happened during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TickStart {
        execution_id: ExecutionId,
        tick: u64,
        timestamp: DateTime<Utc>,
    },
    TickComplete {
        execution_id: ExecutionId,
        tick: u64,
        status: Status,
        store_delta: StoreDelta,
        timestamp: DateTime<Utc>,
    },
    NodeStatusChanged {
        execution_id: ExecutionId,
        tick: u64,
        node_id: NodeId,
        from: Option<Status>,
        to: Option<Status>,
    },
    BreakpointHit {
        execution_id: ExecutionId,
        tick: u64,
        breakpoint_id: u64,
        node_id: NodeId,
        status: Option<Status>,
    },
    WatchTriggered {
        execution_id: ExecutionId,
        tick: u64,
        watch_id: u64,
        key: String,
        previous: Option<Value>,
        current: Option<Value>,
    },
    ExecutionError {
        execution_id: ExecutionId,
        tick: u64,
        node_id: Option<NodeId>,
        path: Option<String>,
        message: String,
    },
    SchedulerStateChanged {
        execution_id: ExecutionId,
        /// Ticks completed by the instance when the transition happened.
        tick: u64,
        from: SchedulerState,
        to: SchedulerState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TickStart,
    TickComplete,
    NodeStatusChanged,
    BreakpointHit,
    WatchTriggered,
    ExecutionError,
    SchedulerStateChanged,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::TickStart { .. } => EventKind::TickStart,
            Event::TickComplete { .. } => EventKind::TickComplete,
            Event::NodeStatusChanged { .. } => EventKind::NodeStatusChanged,
            Event::BreakpointHit { .. } => EventKind::BreakpointHit,
            Event::WatchTriggered { .. } => EventKind::WatchTriggered,
            Event::ExecutionError { .. } => EventKind::ExecutionError,
            Event::SchedulerStateChanged { .. } => EventKind::SchedulerStateChanged,
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        match self {
            Event::TickStart { execution_id, .. }
            | Event::TickComplete { execution_id, .. }
            | Event::NodeStatusChanged { execution_id, .. }
            | Event::BreakpointHit { execution_id, .. }
            | Event::WatchTriggered { execution_id, .. }
            | Event::ExecutionError { execution_id, .. }
            | Event::SchedulerStateChanged { execution_id, .. } => *execution_id,
        }
    }

    pub fn tick(&self) -> u64 {
        match self {
            Event::TickStart { tick, .. }
            | Event::TickComplete { tick, .. }
            | Event::NodeStatusChanged { tick, .. }
            | Event::BreakpointHit { tick, .. }
            | Event::WatchTriggered { tick, .. }
            | Event::ExecutionError { tick, .. }
            | Event::SchedulerStateChanged { tick, .. } => *tick,
        }
    }

    /// The node the event is about, for events that concern one.
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            Event::NodeStatusChanged { node_id, .. } | Event::BreakpointHit { node_id, .. } => {
                Some(node_id)
            }
            Event::ExecutionError { node_id, .. } => node_id.as_ref(),
            _ => None,
        }
    }

    /// Store keys the event carries, for events that carry any.
    pub fn store_keys(&self) -> Option<Vec<&str>> {
        match self {
            Event::TickComplete { store_delta, .. } => Some(store_delta.keys().collect()),
            Event::WatchTriggered { key, .. } => Some(vec![key.as_str()]),
            _ => None,
        }
    }
}

/// Subscription filter. Every dimension is an allow-list; `None` admits everything, and a
/// dimension only rejects events that carry it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub kinds: Option<BTreeSet<EventKind>>,
    /// Inclusive tick bounds.
    #[serde(default)]
    pub from_tick: Option<u64>,
    #[serde(default)]
    pub to_tick: Option<u64>,
    #[serde(default)]
    pub node_ids: Option<BTreeSet<NodeId>>,
    #[serde(default)]
    pub keys: Option<BTreeSet<String>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn ticks(mut self, from: u64, to: u64) -> Self {
        self.from_tick = Some(from);
        self.to_tick = Some(to);
        self
    }

    pub fn nodes(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.node_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        let tick = event.tick();
        if self.from_tick.is_some_and(|from| tick < from) || self.to_tick.is_some_and(|to| tick > to)
        {
            return false;
        }
        if let (Some(ids), Some(node)) = (&self.node_ids, event.node_id()) {
            if !ids.contains(node) {
                return false;
            }
        }
        if let (Some(allowed), Some(keys)) = (&self.keys, event.store_keys()) {
            if !keys.iter().any(|k| allowed.contains(*k)) {
                return false;
            }
        }
        true
    }
}

type Callback = Arc<dyn Fn(&Event) -> Result<(), String> + Send + Sync>;

enum Delivery {
    /// Invoked inline while the instance is locked.
    Immediate(Callback),
    /// Pushed onto a channel; a stream or a drain task consumes it.
    Queued(mpsc::UnboundedSender<Event>),
}

struct Subscriber {
    id: SubscriberId,
    filter: EventFilter,
    delivery: Delivery,
}

/// Fan-out of one instance's events to its subscribers.
///
/// A failing or panicking subscriber is logged and skipped; it never affects ticking or the
/// other subscribers.
pub struct EventEmitter {
    execution_id: ExecutionId,
    subscribers: Vec<Subscriber>,
    next_id: SubscriberId,
    emitted: u64,
}

impl EventEmitter {
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            subscribers: Vec::new(),
            next_id: 1,
            emitted: 0,
        }
    }

    fn allocate_id(&mut self) -> SubscriberId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Subscribe with a stream of events.
    pub fn subscribe(&mut self, filter: EventFilter) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.allocate_id();
        self.subscribers.push(Subscriber {
            id,
            filter,
            delivery: Delivery::Queued(tx),
        });
        EventStream { id, rx }
    }

    /// Subscribe a callback invoked inline during emission.
    ///
    /// The callback runs while the instance is locked and must not call back into the same
    /// instance.
    pub fn subscribe_with<F>(&mut self, filter: EventFilter, callback: F) -> SubscriberId
    where
        F: Fn(&Event) -> Result<(), String> + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.subscribers.push(Subscriber {
            id,
            filter,
            delivery: Delivery::Immediate(Arc::new(callback)),
        });
        id
    }

    /// Subscribe a callback invoked from a separate task, so a slow subscriber cannot stall
    /// ticking. Outside a tokio runtime this degrades to inline delivery.
    pub fn subscribe_deferred<F>(&mut self, filter: EventFilter, callback: F) -> SubscriberId
    where
        F: Fn(&Event) -> Result<(), String> + Send + Sync + 'static,
    {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                execution_id = %self.execution_id,
                "no tokio runtime; deferred subscriber delivered inline"
            );
            return self.subscribe_with(filter, callback);
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let id = self.allocate_id();
        let execution_id = self.execution_id;
        handle.spawn(async move {
            while let Some(event) = rx.recv().await {
                deliver(execution_id, id, &callback, &event);
            }
        });
        self.subscribers.push(Subscriber {
            id,
            filter,
            delivery: Delivery::Queued(tx),
        });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Events emitted over the emitter's lifetime, delivered or not.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn emit(&mut self, event: Event) {
        self.emitted += 1;
        let execution_id = self.execution_id;
        self.subscribers.retain(|sub| {
            if let Delivery::Queued(tx) = &sub.delivery {
                if tx.is_closed() {
                    tracing::debug!(
                        execution_id = %execution_id,
                        subscriber = sub.id,
                        "dropping closed subscriber"
                    );
                    return false;
                }
            }
            if !sub.filter.matches(&event) {
                return true;
            }
            match &sub.delivery {
                Delivery::Immediate(callback) => {
                    deliver(execution_id, sub.id, callback.as_ref(), &event);
                    true
                }
                Delivery::Queued(tx) => {
                    let open = tx.send(event.clone()).is_ok();
                    if !open {
                        tracing::debug!(
                            execution_id = %execution_id,
                            subscriber = sub.id,
                            "dropping closed subscriber"
                        );
                    }
                    open
                }
            }
        });
    }
}

fn deliver<F>(execution_id: ExecutionId, subscriber: SubscriberId, callback: &F, event: &Event)
where
    F: Fn(&Event) -> Result<(), String> + ?Sized,
{
    let reason = match catch_unwind(AssertUnwindSafe(|| callback(event))) {
        Ok(Ok(())) => return,
        Ok(Err(reason)) => reason,
        Err(panic) => panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "subscriber panicked".to_string()),
    };
    let err = RuntimeError::SubscriberDeliveryError {
        subscriber,
        event: format!("{:?}", event.kind()),
        reason,
    };
    tracing::warn!(execution_id = %execution_id, tick = event.tick(), error = %err, "event delivery failed");
}

/// Stream of events for one subscription. Dropping it unsubscribes on the next emission.
pub struct EventStream {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next already-queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Drain everything queued so far.
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tick_start(execution_id: ExecutionId, tick: u64) -> Event {
        Event::TickStart {
            execution_id,
            tick,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn filter_dimensions_only_apply_to_events_that_carry_them() {
        let id = ExecutionId::new();
        let filter = EventFilter::all().nodes([NodeId::new("a")]);
        assert!(filter.matches(&tick_start(id, 1)));
        assert!(!filter.matches(&Event::NodeStatusChanged {
            execution_id: id,
            tick: 1,
            node_id: NodeId::new("b"),
            from: None,
            to: Some(Status::Running),
        }));

        let ranged = EventFilter::all().ticks(2, 3);
        assert!(!ranged.matches(&tick_start(id, 1)));
        assert!(ranged.matches(&tick_start(id, 3)));
        assert!(!ranged.matches(&tick_start(id, 4)));
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let id = ExecutionId::new();
        let mut emitter = EventEmitter::new(id);
        let seen = Arc::new(AtomicUsize::new(0));

        emitter.subscribe_with(EventFilter::all(), |_| panic!("boom"));
        emitter.subscribe_with(EventFilter::all(), |_| Err("nope".to_string()));
        let counter = seen.clone();
        emitter.subscribe_with(EventFilter::all(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        emitter.emit(tick_start(id, 1));
        emitter.emit(tick_start(id, 2));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(emitter.subscriber_count(), 3);
    }

    #[test]
    fn dropped_stream_is_removed_even_if_nothing_matches_it() {
        let id = ExecutionId::new();
        let mut emitter = EventEmitter::new(id);
        let streams: Vec<EventStream> = (0..10)
            .map(|_| emitter.subscribe(EventFilter::all().kinds([EventKind::WatchTriggered])))
            .collect();
        assert_eq!(emitter.subscriber_count(), 10);
        drop(streams);

        emitter.emit(tick_start(id, 1));
        assert_eq!(emitter.subscriber_count(), 0);
    }

    #[test]
    fn dropped_stream_is_removed() {
        let id = ExecutionId::new();
        let mut emitter = EventEmitter::new(id);
        let stream = emitter.subscribe(EventFilter::all());
        let mut kept = emitter.subscribe(EventFilter::all().kinds([EventKind::TickStart]));
        drop(stream);

        emitter.emit(tick_start(id, 1));
        assert_eq!(emitter.subscriber_count(), 1);
        assert_eq!(kept.drain().len(), 1);
    }
}
