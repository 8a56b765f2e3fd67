use std::collections::BTreeMap;
use std::sync::Arc;

use arbor_core::Status;
use indexmap::IndexMap;
use serde_json::Value;

use crate::composites::{Parallel, ReactiveSelector, ReactiveSequence, Selector, Sequence};
use crate::decorators::{Decorator, DecoratorRule};
use crate::error::FactoryError;
use crate::leaves::{CheckKey, CompareOp, Constant, Fault, Increment, Random, SetKey, Wait};
use crate::node::RuntimeNode;

/// Node configuration, in declaration order.
pub type Config = IndexMap<String, Value>;

/// Shape of a node type, checked before its constructor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Decorator,
    Composite,
}

impl NodeKind {
    /// `Err` carries the expected child count, for messages.
    pub fn accepts(self, children: usize) -> Result<(), &'static str> {
        match self {
            NodeKind::Leaf if children != 0 => Err("0"),
            NodeKind::Decorator if children != 1 => Err("exactly 1"),
            NodeKind::Composite if children == 0 => Err("at least 1"),
            _ => Ok(()),
        }
    }
}

/// Everything a constructor gets to build one node.
pub struct NodeSpec {
    pub type_name: String,
    pub name: String,
    pub config: Config,
    pub children: Vec<Box<dyn RuntimeNode>>,
}

impl NodeSpec {
    pub fn config(&self) -> ConfigReader<'_> {
        ConfigReader {
            type_name: &self.type_name,
            config: &self.config,
        }
    }
}

pub type Constructor =
    Arc<dyn Fn(NodeSpec) -> Result<Box<dyn RuntimeNode>, FactoryError> + Send + Sync>;

#[derive(Clone)]
struct FactoryEntry {
    kind: NodeKind,
    constructor: Constructor,
}

/// Type-keyed registry of node constructors.
///
/// New node types are additive: register a constructor under a new type name.
#[derive(Clone, Default)]
pub struct NodeFactory {
    entries: BTreeMap<String, FactoryEntry>,
}

impl NodeFactory {
    /// An empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory with every built-in node type registered.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.register_builtins();
        factory
    }

    pub fn register<F>(&mut self, type_name: impl Into<String>, kind: NodeKind, constructor: F)
    where
        F: Fn(NodeSpec) -> Result<Box<dyn RuntimeNode>, FactoryError> + Send + Sync + 'static,
    {
        self.entries.insert(
            type_name.into(),
            FactoryEntry {
                kind,
                constructor: Arc::new(constructor),
            },
        );
    }

    pub fn kind(&self, type_name: &str) -> Option<NodeKind> {
        self.entries.get(type_name).map(|e| e.kind)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn create(
        &self,
        type_name: &str,
        name: &str,
        config: &Config,
        children: Vec<Box<dyn RuntimeNode>>,
    ) -> Result<Box<dyn RuntimeNode>, FactoryError> {
        let entry = self
            .entries
            .get(type_name)
            .ok_or_else(|| FactoryError::UnknownType {
                type_name: type_name.to_string(),
            })?;

        entry
            .kind
            .accepts(children.len())
            .map_err(|expected| FactoryError::Arity {
                type_name: type_name.to_string(),
                expected,
                actual: children.len(),
            })?;

        (entry.constructor)(NodeSpec {
            type_name: type_name.to_string(),
            name: name.to_string(),
            config: config.clone(),
            children,
        })
    }

    fn register_builtins(&mut self) {
        self.register("Sequence", NodeKind::Composite, |s| {
            Ok(Box::new(ReactiveSequence::new(s.name, s.children)))
        });
        self.register("Selector", NodeKind::Composite, |s| {
            Ok(Box::new(ReactiveSelector::new(s.name, s.children)))
        });
        self.register("MemSequence", NodeKind::Composite, |s| {
            Ok(Box::new(Sequence::new(s.name, s.children)))
        });
        self.register("MemSelector", NodeKind::Composite, |s| {
            Ok(Box::new(Selector::new(s.name, s.children)))
        });
        self.register("Parallel", NodeKind::Composite, |s| {
            let threshold = s.config().u32("success_threshold")?.map(|t| t as usize);
            Ok(Box::new(Parallel::new(s.name, s.children, threshold)))
        });

        self.register("Inverter", NodeKind::Decorator, |s| decorate(s, DecoratorRule::Invert));
        self.register("ForceSuccess", NodeKind::Decorator, |s| {
            decorate(s, DecoratorRule::ForceSuccess)
        });
        self.register("ForceFailure", NodeKind::Decorator, |s| {
            decorate(s, DecoratorRule::ForceFailure)
        });
        self.register("Repeat", NodeKind::Decorator, |s| {
            let count = s.config().u32("count")?;
            decorate(s, DecoratorRule::Repeat(count))
        });
        self.register("Retry", NodeKind::Decorator, |s| {
            let attempts = s.config().u32("attempts")?.unwrap_or(3).max(1);
            decorate(s, DecoratorRule::Retry(attempts))
        });

        self.register("Success", NodeKind::Leaf, |s| {
            Ok(Box::new(Constant::new(s.name, Status::Success)))
        });
        self.register("Failure", NodeKind::Leaf, |s| {
            Ok(Box::new(Constant::new(s.name, Status::Failure)))
        });
        self.register("Running", NodeKind::Leaf, |s| {
            Ok(Box::new(Constant::new(s.name, Status::Running)))
        });
        self.register("Wait", NodeKind::Leaf, |s| {
            let ticks = s.config().u32("ticks")?.unwrap_or(1);
            Ok(Box::new(Wait::new(s.name, ticks)))
        });
        self.register("SetKey", NodeKind::Leaf, |s| {
            let key = s.config().required_str("key")?.to_string();
            let value = s.config.get("value").cloned().unwrap_or(Value::Null);
            Ok(Box::new(SetKey::new(s.name, key, value)))
        });
        self.register("Increment", NodeKind::Leaf, |s| {
            let key = s.config().required_str("key")?.to_string();
            let by = s.config().f64("by")?.unwrap_or(1.0);
            Ok(Box::new(Increment::new(s.name, key, by)))
        });
        self.register("CheckKey", NodeKind::Leaf, |s| {
            let reader = s.config();
            let key = reader.required_str("key")?.to_string();
            let op = match reader.str("op")? {
                None => CompareOp::Exists,
                Some(op) => CompareOp::parse(op).ok_or_else(|| reader.invalid("op", "unknown operator"))?,
            };
            let value = s.config.get("value").cloned().unwrap_or(Value::Null);
            Ok(Box::new(CheckKey::new(s.name, key, op, value)))
        });
        self.register("Random", NodeKind::Leaf, |s| {
            let probability = s.config().f64("probability")?.unwrap_or(0.5);
            Ok(Box::new(Random::new(s.name, probability)))
        });
        self.register("Error", NodeKind::Leaf, |s| {
            let message = s.config().str("message")?.unwrap_or("injected fault").to_string();
            Ok(Box::new(Fault::new(s.name, message)))
        });
    }
}

fn decorate(mut spec: NodeSpec, rule: DecoratorRule) -> Result<Box<dyn RuntimeNode>, FactoryError> {
    let child = spec.children.pop().ok_or_else(|| FactoryError::Arity {
        type_name: spec.type_name.clone(),
        expected: "exactly 1",
        actual: 0,
    })?;
    Ok(Box::new(Decorator::new(spec.name, rule, child)))
}

/// Typed accessors over a node's [`Config`] that report errors against the node type.
pub struct ConfigReader<'a> {
    type_name: &'a str,
    config: &'a Config,
}

impl<'a> ConfigReader<'a> {
    pub fn new(type_name: &'a str, config: &'a Config) -> Self {
        Self { type_name, config }
    }

    pub fn invalid(&self, key: &str, reason: impl Into<String>) -> FactoryError {
        FactoryError::InvalidConfig {
            type_name: self.type_name.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn str(&self, key: &str) -> Result<Option<&'a str>, FactoryError> {
        match self.config.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(self.invalid(key, "expected a string")),
        }
    }

    pub fn required_str(&self, key: &str) -> Result<&'a str, FactoryError> {
        self.str(key)?.ok_or_else(|| self.invalid(key, "missing"))
    }

    pub fn u32(&self, key: &str) -> Result<Option<u32>, FactoryError> {
        match self.config.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| self.invalid(key, "expected a non-negative integer")),
            Some(_) => Err(self.invalid(key, "expected a non-negative integer")),
        }
    }

    pub fn f64(&self, key: &str) -> Result<Option<f64>, FactoryError> {
        match self.config.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(_) => Err(self.invalid(key, "expected a number")),
        }
    }
}
