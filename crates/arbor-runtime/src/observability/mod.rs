//! Observability - events, subscriptions and bounded history.

mod events;
mod history;

pub use events::{Event, EventEmitter, EventFilter, EventKind, EventStream, SubscriberId};
pub use history::{HistoryStore, DEFAULT_HISTORY_CAPACITY};
