//! Definition validation: schema checks plus a serialization round trip.

use std::collections::HashMap;

use arbor_nodes::NodeFactory;
use serde::Serialize;

use super::{resolve, NodeDefinition, NodeId, TreeDefinition, IDENTITY_SCHEME};
use crate::error::{Result, RuntimeError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Identity path of the offending node, when the issue is node-specific.
    pub path: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn at(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: Some(path.to_string()),
            message: message.into(),
        }
    }

    fn global(message: impl Into<String>) -> Self {
        Self {
            path: None,
            message: message.into(),
        }
    }
}

/// Findings from [`validate`]. Issues are advisory; building may still succeed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    /// Whether `resolve(serialize(resolve(d))) == resolve(d)` held.
    pub round_trip_ok: bool,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty() && self.round_trip_ok
    }

    /// Collapse the report into [`RuntimeError::ValidationFailed`] when it has findings.
    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            return Ok(());
        }
        Err(RuntimeError::ValidationFailed {
            issues: self
                .issues
                .into_iter()
                .map(|issue| match issue.path {
                    Some(path) => format!("{path}: {}", issue.message),
                    None => issue.message,
                })
                .collect(),
        })
    }
}

/// Check a definition without building it.
///
/// Resolution errors become issues; with a factory, node types and arities are checked against it.
pub fn validate(
    definition: &TreeDefinition,
    factory: Option<&NodeFactory>,
    max_ref_depth: usize,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    if let Some(scheme) = definition.metadata.identity_scheme.as_deref() {
        if scheme != IDENTITY_SCHEME {
            report.issues.push(ValidationIssue::global(format!(
                "identity scheme '{scheme}' differs from '{IDENTITY_SCHEME}'"
            )));
        }
    }

    let resolved = match resolve(definition, max_ref_depth) {
        Ok(resolved) => resolved,
        Err(err) => {
            report.issues.push(ValidationIssue::global(err.to_string()));
            return report;
        }
    };

    check_nodes(&resolved, factory, &mut report.issues);

    match round_trip(&resolved, definition, max_ref_depth) {
        Ok(true) => report.round_trip_ok = true,
        Ok(false) => report.issues.push(ValidationIssue::global(
            "resolved definition does not survive a serialization round trip",
        )),
        Err(err) => report
            .issues
            .push(ValidationIssue::global(format!("round trip failed: {err}"))),
    }

    for issue in &report.issues {
        tracing::warn!(path = ?issue.path, "{}", issue.message);
    }
    report
}

fn check_nodes(root: &NodeDefinition, factory: Option<&NodeFactory>, issues: &mut Vec<ValidationIssue>) {
    let mut seen: HashMap<&NodeId, String> = HashMap::new();
    root.walk(|node, path| {
        if node.node_type.trim().is_empty() {
            issues.push(ValidationIssue::at(path, "node has no type"));
        }
        if let Some(id) = &node.id {
            if let Some(first) = seen.get(id) {
                issues.push(ValidationIssue::at(
                    path,
                    format!("id '{id}' already used at {first}"),
                ));
            } else {
                seen.insert(id, path.to_string());
            }
        }
        if let Some(factory) = factory {
            match factory.kind(&node.node_type) {
                None if !node.node_type.is_empty() => issues.push(ValidationIssue::at(
                    path,
                    format!("unknown node type '{}'", node.node_type),
                )),
                Some(kind) => {
                    if let Err(expected) = kind.accepts(node.children.len()) {
                        issues.push(ValidationIssue::at(
                            path,
                            format!(
                                "'{}' expects {expected} children, has {}",
                                node.node_type,
                                node.children.len()
                            ),
                        ));
                    }
                }
                None => {}
            }
        }
    });
}

fn round_trip(
    resolved: &NodeDefinition,
    original: &TreeDefinition,
    max_ref_depth: usize,
) -> Result<bool> {
    let exported = TreeDefinition::export(resolved.clone(), original.metadata.clone());
    let reparsed = TreeDefinition::from_json(&exported.to_json()?)?;
    Ok(resolve(&reparsed, max_ref_depth)? == *resolved)
}
