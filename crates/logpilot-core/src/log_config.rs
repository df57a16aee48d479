//! Per-source log configuration compiler.
//!
//! Turns one top-level branch of the label tree into a validated
//! [`LogConfig`]. The branch value is either the literal `stdout` (collect
//! the container's stdout journal) or an absolute in-container file path,
//! which must be covered by a mount so the host-side shipper can reach it.

use crate::config::ShipperKind;
use crate::error::{PilotError, Result};
use crate::label_tree::{convert, LogInfoNode};
use crate::mount::resolve_host_dir;
use crate::runtime::MountRecord;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Timestamp layout of the container runtime's stdout journal.
pub const STDOUT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%NZ";

/// Sentinel format meaning "no parser".
pub const FORMAT_NONE: &str = "nonex";

const TIME_KEY: &str = "time_key";
const DEFAULT_TIME_KEY: &str = "_timestamp";

/// A compiled per-source log description, consumed by the operator template.
///
/// Exactly one of `stdout == true` or (`container_dir`, `file`, `host_dir`
/// all non-empty) holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    pub name: String,
    pub host_dir: String,
    pub container_dir: String,
    pub format: String,
    pub format_config: BTreeMap<String, String>,
    pub file: String,
    pub tags: BTreeMap<String, String>,
    pub target: String,
    pub estimate_time: bool,
    pub stdout: bool,
}

/// Parse a comma-separated `k=v` tag string. Both sides are trimmed and must
/// be non-empty.
pub fn parse_tags(tags: &str) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    if tags.is_empty() {
        return Ok(map);
    }
    for kv in tags.split(',') {
        let parts: Vec<&str> = kv.split('=').collect();
        if parts.len() != 2 {
            return Err(PilotError::InvalidTag(kv.to_string()));
        }
        let key = parts[0].trim();
        let value = parts[1].trim();
        if key.is_empty() || value.is_empty() {
            return Err(PilotError::InvalidTag(kv.to_string()));
        }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

/// Prefix a host path with the directory where the host root is mounted.
pub(crate) fn prefix_base(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return path.to_string();
    }
    format!("{base}/{}", path.trim_start_matches('/'))
}

/// Compile one named branch of the label tree into a [`LogConfig`].
pub fn compile(
    name: &str,
    node: &LogInfoNode,
    json_log_path: &str,
    mounts: &HashMap<String, MountRecord>,
    base: &str,
    shipper: ShipperKind,
) -> Result<LogConfig> {
    let path = node.value.trim();
    if path.is_empty() {
        return Err(PilotError::EmptyPath(name.to_string()));
    }

    let mut tags = parse_tags(node.get("tags"))?;
    let target = node.get("target").to_string();

    if !tags.contains_key("topic") {
        let topic = if !target.is_empty() { &target } else { name };
        tags.insert("topic".to_string(), topic.to_string());
    }

    let (format, mut format_config) = match node.children.get("format") {
        Some(format) if format.value != "none" && !format.value.is_empty() => {
            let mut config = convert(format);
            let mut value = format.value.clone();
            if value == "regexp" {
                let pattern = config.remove("pattern").unwrap_or_default();
                value = format!("/{pattern}/");
            }
            (value, config)
        }
        _ => (FORMAT_NONE.to_string(), BTreeMap::new()),
    };

    if path == "stdout" {
        let journal = Path::new(json_log_path);
        let mut file = journal
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        if shipper == ShipperKind::Filebeat {
            // match the journal's rotated siblings as well
            file.push('*');
        }
        let host_dir = journal
            .parent()
            .map(|d| d.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Ok(LogConfig {
            name: name.to_string(),
            host_dir: prefix_base(base, &host_dir),
            container_dir: String::new(),
            format,
            format_config: BTreeMap::from([(
                "time_format".to_string(),
                STDOUT_TIME_FORMAT.to_string(),
            )]),
            file,
            tags,
            target,
            estimate_time: false,
            stdout: true,
        });
    }

    if !path.starts_with('/') {
        return Err(PilotError::RelativePath {
            name: name.to_string(),
            path: path.to_string(),
        });
    }
    let file = Path::new(path)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    if path.ends_with('/') || file.is_empty() {
        return Err(PilotError::NotAFile {
            name: name.to_string(),
            path: path.to_string(),
        });
    }
    let container_dir = Path::new(path)
        .parent()
        .map(|d| d.to_string_lossy().into_owned())
        .unwrap_or_default();

    let host_dir =
        resolve_host_dir(&container_dir, mounts).ok_or_else(|| PilotError::NotMounted {
            name: name.to_string(),
            path: path.to_string(),
        })?;

    let estimate_time = format_config.get(TIME_KEY).is_none_or(String::is_empty);
    if estimate_time {
        format_config.insert(TIME_KEY.to_string(), DEFAULT_TIME_KEY.to_string());
    }

    Ok(LogConfig {
        name: name.to_string(),
        host_dir: prefix_base(base, &host_dir),
        container_dir,
        format,
        format_config,
        file,
        tags,
        target,
        estimate_time,
        stdout: false,
    })
}
