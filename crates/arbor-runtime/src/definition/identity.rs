//! Deterministic node identity.
//!
//! An id is a pure function of the node's type, name, position and significant config, so two
//! independent serializations of the same logical tree agree node-for-node.

use std::fmt::Write as _;

use arbor_nodes::Config;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{NodeDefinition, NodeId};

/// Name of the digest input layout. Changing any input below requires a new scheme name.
pub const IDENTITY_SCHEME: &str = "arbor-id/v1";

const ID_PREFIX: &str = "n-";
const ID_BYTES: usize = 16;

pub(crate) fn root_path(node_type: &str) -> String {
    format!("0:{node_type}")
}

pub(crate) fn child_path(parent: &str, index: usize, node_type: &str) -> String {
    format!("{parent}/{index}:{node_type}")
}

/// Fill in ids for every node without an explicit one. Explicit ids are kept untouched.
pub fn assign_ids(root: &mut NodeDefinition) {
    let path = root_path(&root.node_type);
    assign(root, &path);
}

fn assign(node: &mut NodeDefinition, path: &str) {
    if node.id.is_none() {
        node.id = Some(derive_id(&node.node_type, &node.name, path, &node.config));
    }
    for (index, child) in node.children.iter_mut().enumerate() {
        let child_path = child_path(path, index, &child.node_type);
        assign(child, &child_path);
    }
}

/// Derive the identifier for one node.
///
/// Digest input: `scheme \0 type \0 name \0 path \0 canonical(config)`.
pub fn derive_id(node_type: &str, name: &str, path: &str, config: &Config) -> NodeId {
    let mut hasher = Sha256::new();
    for part in [IDENTITY_SCHEME, node_type, name, path] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(canonical_config(config).as_bytes());
    let digest = hasher.finalize();
    NodeId::new(format!("{ID_PREFIX}{}", hex::encode(&digest[..ID_BYTES])))
}

/// Compact JSON of the significant config entries, object keys sorted at every level.
///
/// Keys starting with `_` are presentation-only and never affect identity.
pub fn canonical_config(config: &Config) -> String {
    let mut entries: Vec<(&String, &Value)> = config
        .iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut out = String::from("{");
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(&mut out, key);
        out.push(':');
        write_canonical(&mut out, value);
    }
    out.push('}');
    out
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_canonical(out, &map[key.as_str()]);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    let _ = write!(out, "{}", Value::String(s.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(pairs: &[(&str, Value)]) -> Config {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn canonical_form_ignores_order_and_presentation_keys() {
        let a = config(&[
            ("b", json!({"y": 1, "x": [2, {"d": 0, "c": 1}]})),
            ("a", json!("s")),
            ("_ui", json!({"x": 10})),
        ]);
        let b = config(&[
            ("a", json!("s")),
            ("b", json!({"x": [2, {"c": 1, "d": 0}], "y": 1})),
        ]);
        assert_eq!(canonical_config(&a), canonical_config(&b));
        assert_eq!(
            canonical_config(&b),
            r#"{"a":"s","b":{"x":[2,{"c":1,"d":0}],"y":1}}"#
        );
    }

    #[test]
    fn id_depends_on_every_input() {
        let empty = Config::new();
        let base = derive_id("Wait", "a", "0:Sequence/1:Wait", &empty);
        assert!(base.as_str().starts_with("n-"));
        assert_eq!(base.as_str().len(), 2 + ID_BYTES * 2);

        assert_ne!(base, derive_id("Wait", "b", "0:Sequence/1:Wait", &empty));
        assert_ne!(base, derive_id("Wait", "a", "0:Sequence/0:Wait", &empty));
        assert_ne!(base, derive_id("Success", "a", "0:Sequence/1:Wait", &empty));
        assert_ne!(
            base,
            derive_id("Wait", "a", "0:Sequence/1:Wait", &config(&[("ticks", json!(2))]))
        );
        assert_eq!(
            base,
            derive_id("Wait", "a", "0:Sequence/1:Wait", &config(&[("_comment", json!("x"))]))
        );
    }

    #[test]
    fn separators_keep_fields_apart() {
        let empty = Config::new();
        assert_ne!(
            derive_id("ab", "c", "0:ab", &empty),
            derive_id("a", "bc", "0:ab", &empty)
        );
    }
}
