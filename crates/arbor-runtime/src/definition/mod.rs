//! Definition - the portable, serializable form of a behavior tree.
//!
//! A [`TreeDefinition`] is what gets stored and exchanged. It may reference named subtrees;
//! [`resolve`] inlines them and assigns every node a deterministic identifier, producing the
//! ref-free [`NodeDefinition`] the builder consumes.

mod identity;
mod resolver;
mod validate;

use std::collections::BTreeMap;
use std::fmt;

use arbor_nodes::Config;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RuntimeError};

pub use identity::{assign_ids, canonical_config, derive_id, IDENTITY_SCHEME};
pub use resolver::{Resolver, DEFAULT_MAX_REF_DEPTH};
pub use validate::{validate, ValidationIssue, ValidationReport};

/// Stable node identifier, either explicit in the definition or derived by the identity scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One node of a definition tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Behavior library type name. A pure reference node may leave it empty.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub node_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Config::is_empty")]
    pub config: Config,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDefinition>,

    /// Name of a subtree this node expands to. Exclusive with `children`.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub subtree: Option<String>,
}

impl NodeDefinition {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            ..Self::default()
        }
    }

    /// A node that expands to the named subtree.
    pub fn reference(subtree: impl Into<String>) -> Self {
        Self {
            subtree: Some(subtree.into()),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: NodeDefinition) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = NodeDefinition>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn is_reference(&self) -> bool {
        self.subtree.is_some()
    }

    /// Pre-order traversal with each node's identity path.
    pub fn walk<'a>(&'a self, mut visit: impl FnMut(&'a NodeDefinition, &str)) {
        fn go<'a>(
            node: &'a NodeDefinition,
            path: &str,
            visit: &mut impl FnMut(&'a NodeDefinition, &str),
        ) {
            visit(node, path);
            for (index, child) in node.children.iter().enumerate() {
                let child_path = identity::child_path(path, index, &child.node_type);
                go(child, &child_path, visit);
            }
        }

        let root = identity::root_path(&self.node_type);
        go(self, &root, &mut visit);
    }

    /// Every node id in pre-order. Nodes without an id are skipped.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        self.walk(|node, _| ids.extend(node.id.clone()));
        ids
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(|_, _| count += 1);
        count
    }
}

/// Definition-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Identity scheme the node ids were derived with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_scheme: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A complete, portable behavior tree definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeDefinition {
    pub root: NodeDefinition,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subtrees: BTreeMap<String, NodeDefinition>,

    #[serde(default)]
    pub metadata: TreeMetadata,
}

impl TreeDefinition {
    pub fn new(root: NodeDefinition) -> Self {
        Self {
            root,
            ..Self::default()
        }
    }

    pub fn with_subtree(mut self, name: impl Into<String>, root: NodeDefinition) -> Self {
        self.subtrees.insert(name.into(), root);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = Some(name.into());
        self
    }

    /// Wrap an already resolved root for serialization, stamping the identity scheme.
    pub fn export(resolved: NodeDefinition, metadata: TreeMetadata) -> Self {
        Self {
            root: resolved,
            subtrees: BTreeMap::new(),
            metadata: TreeMetadata {
                identity_scheme: Some(IDENTITY_SCHEME.to_string()),
                ..metadata
            },
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Whether the recorded identity scheme, if any, is the one this runtime derives ids with.
    pub fn scheme_matches(&self) -> bool {
        self.metadata
            .identity_scheme
            .as_deref()
            .map_or(true, |scheme| scheme == IDENTITY_SCHEME)
    }
}

/// Inline every subtree reference and assign identifiers to nodes that lack one.
///
/// A recorded identity scheme other than [`IDENTITY_SCHEME`] is reported through
/// [`validate`]; resolution itself proceeds and re-derives missing ids with the current scheme.
pub fn resolve(definition: &TreeDefinition, max_ref_depth: usize) -> Result<NodeDefinition> {
    if !definition.scheme_matches() {
        let err = RuntimeError::ValidationFailed {
            issues: vec![format!(
                "identity scheme '{}' differs from '{}'",
                definition.metadata.identity_scheme.as_deref().unwrap_or_default(),
                IDENTITY_SCHEME
            )],
        };
        tracing::warn!(error = %err, "resolving definition with a foreign identity scheme");
    }

    let mut root = Resolver::new(&definition.subtrees, max_ref_depth).expand(&definition.root)?;
    assign_ids(&mut root);
    Ok(root)
}
