//! Snapshots - immutable per-tick captures of an execution.

use std::collections::{BTreeMap, BTreeSet};

use arbor_core::{AccessLog, Blackboard, Status};
use arbor_nodes::{BehaviorTree, RuntimeNode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::builder::NodeIndex;
use super::ExecutionId;
use crate::definition::NodeId;

/// Observable state of one node at the end of a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// `None` until the node has been ticked, and again after a running node is halted.
    pub status: Option<Status>,
    pub message: Option<String>,
    /// Child the node is currently parked on.
    pub selected_child: Option<NodeId>,
    pub last_tick: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub execution_id: ExecutionId,
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    /// `None` before the first tick.
    pub root_status: Option<Status>,
    pub nodes: BTreeMap<NodeId, NodeSnapshot>,
    /// Deepest running node, following selected children from the root.
    pub tip: Option<NodeId>,
    pub store: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn capture(
        execution_id: ExecutionId,
        tick: u64,
        tree: &BehaviorTree,
        index: &NodeIndex,
        store: &Blackboard,
    ) -> Self {
        let mut nodes = BTreeMap::new();
        for info in index.iter() {
            let Some(node) = tree.node_at(&info.path) else {
                continue;
            };
            let selected_child = node.active_child().and_then(|i| {
                let mut child = info.path.clone();
                child.push(i);
                index.at_path(&child).map(|c| c.id.clone())
            });
            nodes.insert(
                info.id.clone(),
                NodeSnapshot {
                    status: node.status(),
                    message: node.message().map(str::to_string),
                    selected_child,
                    last_tick: node.state().last_tick,
                },
            );
        }

        Self {
            execution_id,
            tick,
            timestamp: Utc::now(),
            root_status: tree.last_status(),
            nodes,
            tip: find_tip(tree.root(), index),
            store: store.entries().clone(),
        }
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeSnapshot> {
        self.nodes.get(id)
    }

    pub fn status_of(&self, id: &NodeId) -> Option<Status> {
        self.nodes.get(id).and_then(|n| n.status)
    }

    /// What changed between `self` and a later snapshot.
    pub fn diff(&self, later: &Snapshot) -> SnapshotDiff {
        let mut nodes = Vec::new();
        for (id, after) in &later.nodes {
            let before = self.nodes.get(id).and_then(|n| n.status);
            if before != after.status {
                nodes.push(NodeChange {
                    node_id: id.clone(),
                    from: before,
                    to: after.status,
                });
            }
        }

        let mut store = StoreDiff::default();
        for (key, value) in &later.store {
            match self.store.get(key) {
                None => {
                    store.added.insert(key.clone(), value.clone());
                }
                Some(old) if old != value => {
                    store
                        .changed
                        .insert(key.clone(), (old.clone(), value.clone()));
                }
                Some(_) => {}
            }
        }
        for (key, value) in &self.store {
            if !later.store.contains_key(key) {
                store.removed.insert(key.clone(), value.clone());
            }
        }

        SnapshotDiff {
            from_tick: self.tick,
            to_tick: later.tick,
            root_status: (self.root_status, later.root_status),
            nodes,
            store,
        }
    }
}

fn find_tip(root: &dyn RuntimeNode, index: &NodeIndex) -> Option<NodeId> {
    if root.status() != Some(Status::Running) {
        return None;
    }
    let mut node = root;
    let mut path = Vec::new();
    loop {
        let next = node
            .active_child()
            .map(|i| (i, node.children().get(i)))
            .or_else(|| {
                node.children()
                    .iter()
                    .position(|c| c.status() == Some(Status::Running))
                    .map(|i| (i, node.children().get(i)))
            });
        match next {
            Some((i, Some(child))) if child.status() == Some(Status::Running) => {
                path.push(i);
                node = child.as_ref();
            }
            _ => break,
        }
    }
    index.at_path(&path).map(|info| info.id.clone())
}

/// Per-node status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeChange {
    pub node_id: NodeId,
    pub from: Option<Status>,
    pub to: Option<Status>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDiff {
    pub added: BTreeMap<String, Value>,
    /// Removed keys with their last value.
    pub removed: BTreeMap<String, Value>,
    /// `(before, after)` per key.
    pub changed: BTreeMap<String, (Value, Value)>,
}

impl StoreDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub from_tick: u64,
    pub to_tick: u64,
    pub root_status: (Option<Status>, Option<Status>),
    pub nodes: Vec<NodeChange>,
    pub store: StoreDiff,
}

/// Store mutations made during one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDelta {
    /// Final value of every key written this tick.
    pub written: BTreeMap<String, Value>,
    pub removed: BTreeSet<String>,
}

impl StoreDelta {
    pub fn from_access(access: &AccessLog, store: &Blackboard) -> Self {
        let written = access
            .writes
            .iter()
            .filter_map(|key| store.peek(key).map(|v| (key.clone(), v.clone())))
            .collect();
        let removed = access
            .removals
            .iter()
            .filter(|key| !store.contains(key))
            .cloned()
            .collect();
        Self { written, removed }
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.removed.is_empty()
    }

    /// Keys touched this tick.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.written
            .keys()
            .chain(self.removed.iter())
            .map(String::as_str)
    }
}
