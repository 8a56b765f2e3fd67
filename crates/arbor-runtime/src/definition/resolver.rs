//! Subtree reference expansion.

use std::collections::BTreeMap;

use super::identity::{child_path, root_path};
use super::NodeDefinition;
use crate::error::{Result, RuntimeError};

/// Default ceiling on nested subtree references.
pub const DEFAULT_MAX_REF_DEPTH: usize = 100;

/// Inlines `ref` nodes against a subtree table.
///
/// The visited set is scoped to the current expansion chain, so one subtree may appear in any
/// number of sibling branches but never inside itself.
pub struct Resolver<'a> {
    subtrees: &'a BTreeMap<String, NodeDefinition>,
    max_depth: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(subtrees: &'a BTreeMap<String, NodeDefinition>, max_depth: usize) -> Self {
        Self {
            subtrees,
            max_depth,
        }
    }

    /// Return a ref-free copy of `root`.
    pub fn expand(&self, root: &NodeDefinition) -> Result<NodeDefinition> {
        let mut chain = Vec::new();
        self.expand_node(root, &root_path(&root.node_type), &mut chain)
    }

    fn expand_node(
        &self,
        node: &NodeDefinition,
        path: &str,
        chain: &mut Vec<String>,
    ) -> Result<NodeDefinition> {
        if let Some(name) = &node.subtree {
            if !node.children.is_empty() {
                return Err(RuntimeError::InvalidDefinition {
                    path: path.to_string(),
                    reason: format!("node references subtree '{name}' and also has children"),
                });
            }
            if let Some(start) = chain.iter().position(|seen| seen == name) {
                let mut cycle = chain[start..].to_vec();
                cycle.push(name.clone());
                return Err(RuntimeError::CycleDetected {
                    path: path.to_string(),
                    cycle,
                });
            }
            if chain.len() >= self.max_depth {
                return Err(RuntimeError::DepthExceeded {
                    path: path.to_string(),
                    limit: self.max_depth,
                });
            }
            let target = self
                .subtrees
                .get(name)
                .ok_or_else(|| RuntimeError::MissingSubtree {
                    name: name.clone(),
                    path: path.to_string(),
                })?;

            chain.push(name.clone());
            let expanded = self.expand_node(&overlay(node, target), path, chain);
            chain.pop();
            return expanded;
        }

        let mut children = Vec::with_capacity(node.children.len());
        for (index, child) in node.children.iter().enumerate() {
            let child_path = child_path(path, index, &child.node_type);
            children.push(self.expand_node(child, &child_path, chain)?);
        }

        Ok(NodeDefinition {
            children,
            ..shallow(node)
        })
    }
}

/// The subtree root as seen from the referencing node: its name, explicit id and config entries
/// win over the subtree's own. The referencing node's type is ignored.
fn overlay(reference: &NodeDefinition, target: &NodeDefinition) -> NodeDefinition {
    let mut node = target.clone();
    if !reference.name.is_empty() {
        node.name = reference.name.clone();
    }
    if reference.id.is_some() {
        node.id = reference.id.clone();
    }
    for (key, value) in &reference.config {
        node.config.insert(key.clone(), value.clone());
    }
    node
}

fn shallow(node: &NodeDefinition) -> NodeDefinition {
    NodeDefinition {
        node_type: node.node_type.clone(),
        id: node.id.clone(),
        name: node.name.clone(),
        config: node.config.clone(),
        children: Vec::new(),
        subtree: None,
    }
}
