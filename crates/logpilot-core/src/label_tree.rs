//! Label tree builder.
//!
//! Labels of the form `<prefix>.logs.<name>[.<key>...]` describe a
//! container's log sources. This module compiles the flat label map into a
//! tree of [`LogInfoNode`]s, one top-level child per log source. Environment
//! entries of the form `<prefix>_logs_<rest>=<value>` are rewritten to label
//! keys beforehand so both declaration styles merge into the same tree.

use crate::error::{PilotError, Result};
use std::collections::BTreeMap;

/// One node of the log-intent tree: a value plus named children.
///
/// Label keys form a forest of dotted paths, so no cycles can arise.
#[derive(Debug, Default, Clone)]
pub struct LogInfoNode {
    pub value: String,
    pub children: BTreeMap<String, LogInfoNode>,
}

impl LogInfoNode {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            children: BTreeMap::new(),
        }
    }

    /// Insert a dotted path. Paths of length >= 2 require the parent chain
    /// to exist already; label keys are processed in lexicographic order so
    /// parents are always seen first when declared.
    fn insert(&mut self, keys: &[&str], value: &str) -> Result<()> {
        let Some((key, rest)) = keys.split_first() else {
            return Ok(());
        };
        if !rest.is_empty() {
            match self.children.get_mut(*key) {
                Some(child) => child.insert(rest, value),
                None => Err(PilotError::OrphanLabel((*key).to_string())),
            }
        } else {
            self.children.insert((*key).to_string(), LogInfoNode::new(value));
            Ok(())
        }
    }

    /// Value of a direct child, or the empty string.
    pub fn get(&self, key: &str) -> &str {
        self.children.get(key).map_or("", |c| c.value.as_str())
    }
}

/// Rewrite `<prefix>_logs_<rest>=<value>` environment entries into label
/// key/value pairs by replacing every `_` in the key with `.`.
pub fn env_to_labels(env: &[String], prefixes: &[String]) -> Vec<(String, String)> {
    let mut labels = Vec::new();
    for entry in env {
        for prefix in prefixes {
            let stem = format!("{prefix}_logs_");
            if !entry.starts_with(&stem) {
                continue;
            }
            if let Some((key, value)) = entry.split_once('=') {
                labels.push((key.replace('_', "."), value.to_string()));
            }
        }
    }
    labels
}

/// Build the log-intent tree from a label map.
///
/// Keys are visited in lexicographic order (the map is sorted), which
/// guarantees `<prefix>.logs.a` is inserted before `<prefix>.logs.a.tags`.
/// A child key whose parent was never declared is a hard error for the
/// container.
pub fn build_log_tree(
    labels: &BTreeMap<String, String>,
    prefixes: &[String],
) -> Result<LogInfoNode> {
    let mut root = LogInfoNode::new("");
    for (key, value) in labels {
        for prefix in prefixes {
            let stem = format!("{prefix}.logs.");
            let Some(rest) = key.strip_prefix(&stem) else {
                continue;
            };
            // a bare `<prefix>.logs` (or trailing-dot) key names no source
            if rest.is_empty() {
                continue;
            }
            let segments: Vec<&str> = rest.split('.').collect();
            root.insert(&segments, value)?;
        }
    }
    Ok(root)
}

/// Flatten a subtree into a key/value map. Nested children are merged after
/// their parent entries, so deeper keys take precedence.
pub fn convert(node: &LogInfoNode) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (key, child) in &node.children {
        map.insert(key.clone(), child.value.clone());
        for (nested_key, nested_value) in convert(child) {
            map.insert(nested_key, nested_value);
        }
    }
    map
}
