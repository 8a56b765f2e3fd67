//! Tree builder - turns a resolved definition into a runtime tree.

use std::collections::{BTreeMap, HashMap};

use arbor_nodes::{BehaviorTree, NodeFactory, NodeTag, RuntimeNode};
use serde::{Deserialize, Serialize};

use crate::definition::{NodeDefinition, NodeId};
use crate::error::{Result, RuntimeError};

/// What to do with a node type the factory does not know.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum UnknownTypePolicy {
    /// Refuse to build the tree.
    #[default]
    FailClosed,
    /// Build the given type in its place.
    Fallback { node_type: String },
}

/// Where a node sits in the runtime tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub node_type: String,
    pub name: String,
    /// Child indices from the root.
    pub path: Vec<usize>,
    /// Identity path, e.g. `0:Sequence/1:Wait`.
    pub display_path: String,
    pub parent: Option<NodeId>,
}

/// Bidirectional id <-> path index over a built tree, in pre-order.
#[derive(Debug, Clone, Default)]
pub struct NodeIndex {
    nodes: Vec<NodeInfo>,
    by_id: HashMap<NodeId, usize>,
    by_path: BTreeMap<Vec<usize>, usize>,
}

impl NodeIndex {
    fn insert(&mut self, info: NodeInfo) {
        let slot = self.nodes.len();
        self.by_id.insert(info.id.clone(), slot);
        self.by_path.insert(info.path.clone(), slot);
        self.nodes.push(info);
    }

    pub fn get(&self, id: &NodeId) -> Option<&NodeInfo> {
        self.by_id.get(id).map(|&slot| &self.nodes[slot])
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn at_path(&self, path: &[usize]) -> Option<&NodeInfo> {
        self.by_path.get(path).map(|&slot| &self.nodes[slot])
    }

    pub fn path_of(&self, id: &NodeId) -> Option<&[usize]> {
        self.get(id).map(|info| info.path.as_slice())
    }

    pub fn root(&self) -> Option<&NodeInfo> {
        self.nodes.first()
    }

    /// Nodes in pre-order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A runtime tree together with the index that maps it back to its definition.
pub struct BuiltTree {
    pub tree: BehaviorTree,
    pub index: NodeIndex,
}

/// Builds runtime trees bottom-up through a [`NodeFactory`].
pub struct TreeBuilder<'a> {
    factory: &'a NodeFactory,
    policy: &'a UnknownTypePolicy,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(factory: &'a NodeFactory, policy: &'a UnknownTypePolicy) -> Self {
        Self { factory, policy }
    }

    /// Build from a resolved definition. Every node must carry an id and no subtree reference.
    pub fn build(&self, root: &NodeDefinition) -> Result<BuiltTree> {
        let mut index = NodeIndex::default();
        let mut path = Vec::new();
        let display_path = format!("0:{}", root.node_type);
        let node = self.build_node(root, &mut path, &display_path, None, &mut index)?;
        Ok(BuiltTree {
            tree: BehaviorTree::new(node),
            index,
        })
    }

    fn build_node(
        &self,
        def: &NodeDefinition,
        path: &mut Vec<usize>,
        display_path: &str,
        parent: Option<&NodeId>,
        index: &mut NodeIndex,
    ) -> Result<Box<dyn RuntimeNode>> {
        if def.subtree.is_some() {
            return Err(RuntimeError::InvalidDefinition {
                path: display_path.to_string(),
                reason: "unresolved subtree reference".to_string(),
            });
        }
        let id = def.id.clone().ok_or_else(|| RuntimeError::InvalidDefinition {
            path: display_path.to_string(),
            reason: "node has no id; resolve the definition first".to_string(),
        })?;
        if let Some(existing) = index.get(&id) {
            return Err(RuntimeError::DuplicateNodeId {
                node_id: id,
                path: format!("{display_path} (first at {})", existing.display_path),
            });
        }
        index.insert(NodeInfo {
            id: id.clone(),
            node_type: def.node_type.clone(),
            name: def.name.clone(),
            path: path.clone(),
            display_path: display_path.to_string(),
            parent: parent.cloned(),
        });

        let mut children = Vec::with_capacity(def.children.len());
        for (i, child) in def.children.iter().enumerate() {
            path.push(i);
            let child_display_path = format!("{display_path}/{i}:{}", child.node_type);
            let built = self.build_node(child, path, &child_display_path, Some(&id), index);
            path.pop();
            children.push(built?);
        }

        let type_name = self.type_for(def, &id, display_path)?;
        let mut node = self
            .factory
            .create(type_name, &def.name, &def.config, children)
            .map_err(|source| RuntimeError::Build {
                node_id: id.clone(),
                path: display_path.to_string(),
                source,
            })?;
        node.set_tag(NodeTag::new(id.as_str()));
        Ok(node)
    }

    fn type_for<'d>(
        &'d self,
        def: &'d NodeDefinition,
        id: &NodeId,
        display_path: &str,
    ) -> Result<&'d str> {
        if self.factory.contains(&def.node_type) {
            return Ok(&def.node_type);
        }
        match self.policy {
            UnknownTypePolicy::FailClosed => Err(RuntimeError::UnknownNodeType {
                type_name: def.node_type.clone(),
                node_id: id.clone(),
                path: display_path.to_string(),
            }),
            UnknownTypePolicy::Fallback { node_type } => {
                tracing::warn!(
                    node_id = %id,
                    path = display_path,
                    unknown = %def.node_type,
                    fallback = %node_type,
                    "substituting unknown node type"
                );
                Ok(node_type)
            }
        }
    }
}
