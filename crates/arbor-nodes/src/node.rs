use std::fmt;
use std::sync::Arc;

use arbor_core::{Blackboard, Status, TickContext};

use crate::error::NodeError;

/// Opaque per-node tag. The runtime stores the originating definition identifier here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeTag(Arc<str>);

impl NodeTag {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bookkeeping every node carries: its tag, display name and the outcome of its last tick.
#[derive(Debug, Clone, Default)]
pub struct NodeState {
    pub tag: Option<NodeTag>,
    pub name: String,
    pub status: Option<Status>,
    pub message: Option<String>,
    pub last_tick: Option<u64>,
}

impl NodeState {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn record(&mut self, tick: u64, status: Status) {
        self.status = Some(status);
        self.last_tick = Some(tick);
    }

    /// A halted node that was mid-flight no longer has a meaningful status.
    fn halt(&mut self) {
        if self.status == Some(Status::Running) {
            self.status = None;
        }
    }
}

/// Capability contract the runtime relies on.
///
/// Implementors provide `on_tick`/`on_reset`; the provided `tick`/`reset` wrappers keep
/// [`NodeState`] current and attribute errors to the node that raised them.
pub trait RuntimeNode: Send + 'static {
    fn on_tick(&mut self, ctx: &TickContext, blackboard: &mut Blackboard)
        -> Result<Status, NodeError>;

    fn on_reset(&mut self) {}

    fn state(&self) -> &NodeState;

    fn state_mut(&mut self) -> &mut NodeState;

    fn children(&self) -> &[Box<dyn RuntimeNode>] {
        &[]
    }

    /// Index of the child the node is currently parked on, if any.
    fn active_child(&self) -> Option<usize> {
        None
    }

    fn tick(&mut self, ctx: &TickContext, blackboard: &mut Blackboard) -> Result<Status, NodeError> {
        match self.on_tick(ctx, blackboard) {
            Ok(status) => {
                self.state_mut().record(ctx.tick, status);
                Ok(status)
            }
            Err(err) => {
                let state = self.state_mut();
                state.last_tick = Some(ctx.tick);
                state.message = Some(err.message.clone());
                Err(err.located(state.tag.as_ref()))
            }
        }
    }

    fn reset(&mut self) {
        self.on_reset();
        self.state_mut().halt();
    }

    fn tag(&self) -> Option<&NodeTag> {
        self.state().tag.as_ref()
    }

    fn set_tag(&mut self, tag: NodeTag) {
        self.state_mut().tag = Some(tag);
    }

    fn status(&self) -> Option<Status> {
        self.state().status
    }

    fn message(&self) -> Option<&str> {
        self.state().message.as_deref()
    }
}
