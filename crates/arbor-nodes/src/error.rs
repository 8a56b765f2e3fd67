use thiserror::Error;

use crate::node::NodeTag;

/// Failure raised by a node while ticking.
///
/// The innermost node that raised the error records its tag; parents propagate it untouched so
/// the runtime can point at the exact node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct NodeError {
    pub message: String,
    pub node: Option<NodeTag>,
}

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            node: None,
        }
    }

    /// Attach `tag` unless a deeper node already claimed the error.
    pub fn located(mut self, tag: Option<&NodeTag>) -> Self {
        if self.node.is_none() {
            self.node = tag.cloned();
        }
        self
    }
}

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("unknown node type '{type_name}'")]
    UnknownType { type_name: String },

    #[error("node type '{type_name}' expects {expected} children, got {actual}")]
    Arity {
        type_name: String,
        expected: &'static str,
        actual: usize,
    },

    #[error("invalid config '{key}' for node type '{type_name}': {reason}")]
    InvalidConfig {
        type_name: String,
        key: String,
        reason: String,
    },
}
