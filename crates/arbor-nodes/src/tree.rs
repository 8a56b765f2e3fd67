use arbor_core::{Blackboard, Status, TickContext};

use crate::error::NodeError;
use crate::node::RuntimeNode;

/// Owns a root node and restarts it after every terminal result.
///
/// Whether a composite resumes or restarts a running child is decided by the composite itself;
/// callers only ever tick the root.
pub struct BehaviorTree {
    root: Box<dyn RuntimeNode>,
    last: Option<Status>,
}

impl BehaviorTree {
    pub fn new(root: Box<dyn RuntimeNode>) -> Self {
        Self { root, last: None }
    }

    pub fn last_status(&self) -> Option<Status> {
        self.last
    }

    pub fn root(&self) -> &dyn RuntimeNode {
        self.root.as_ref()
    }

    /// Follow child indices from the root.
    pub fn node_at(&self, path: &[usize]) -> Option<&dyn RuntimeNode> {
        let mut node = self.root.as_ref();
        for &index in path {
            node = node.children().get(index)?.as_ref();
        }
        Some(node)
    }

    pub fn tick(
        &mut self,
        ctx: &TickContext,
        blackboard: &mut Blackboard,
    ) -> Result<Status, NodeError> {
        let result = self.root.tick(ctx, blackboard);
        match result {
            Ok(status) => {
                self.last = Some(status);
                if status.is_terminal() {
                    self.root.on_reset();
                }
            }
            Err(_) => {
                self.last = None;
                self.root.reset();
            }
        }
        result
    }
}
