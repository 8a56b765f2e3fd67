//! Deterministic, engine-agnostic primitives shared by the Arbor crates.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod blackboard;
pub mod rng;
pub mod status;
pub mod tick;

pub use blackboard::{AccessLog, BbKey, Blackboard, StoreError};
pub use rng::{DeterministicRng, SplitMix64};
pub use status::Status;
pub use tick::TickContext;
