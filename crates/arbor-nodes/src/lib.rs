//! Behavior tree node library for Arbor.
//!
//! Node semantics live here and only here. The runtime builds trees through [`NodeFactory`] and
//! drives them through the [`RuntimeNode`] capability trait without knowing what any node does.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod composites;
pub mod decorators;
pub mod error;
pub mod factory;
pub mod leaves;
pub mod node;
pub mod tree;

pub use error::{FactoryError, NodeError};
pub use factory::{Config, ConfigReader, Constructor, NodeFactory, NodeKind, NodeSpec};
pub use node::{NodeState, NodeTag, RuntimeNode};
pub use tree::BehaviorTree;
// `Sequence` and `Selector` re-evaluate earlier children every tick, matching the factory's
// default type names; the `Mem*` aliases resume at the running child.
pub use composites::{
    Parallel, ReactiveSelector, ReactiveSequence, Selector as MemSelector,
    Sequence as MemSequence,
};
pub use composites::{ReactiveSelector as Selector, ReactiveSequence as Sequence};
