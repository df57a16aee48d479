//! Resolve container-internal directories to host directories through the
//! container's mount table.

use crate::runtime::MountRecord;
use std::collections::HashMap;
use std::path::Path;

/// Find the host directory backing `container_dir`.
///
/// Walks from `container_dir` upwards looking for the nearest mount
/// destination covering the path. When an ancestor mount is found, the
/// remainder of the path is re-applied under the mount source. `None` means
/// no mount covers the path.
pub fn resolve_host_dir(
    container_dir: &str,
    mounts: &HashMap<String, MountRecord>,
) -> Option<String> {
    let original = Path::new(container_dir);
    let mut current = original;
    loop {
        if let Some(point) = mounts.get(&current.to_string_lossy().into_owned()) {
            if current == original {
                return Some(point.source.clone());
            }
            let relative = original.strip_prefix(current).ok()?;
            return Some(format!("{}/{}", point.source, relative.display()));
        }
        current = current.parent()?;
        if current == Path::new("/") || current == Path::new(".") || current.as_os_str().is_empty()
        {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mounts(entries: &[(&str, &str)]) -> HashMap<String, MountRecord> {
        entries
            .iter()
            .map(|(dest, src)| {
                (
                    dest.to_string(),
                    MountRecord {
                        destination: dest.to_string(),
                        source: src.to_string(),
                        kind: "bind".to_string(),
                        name: String::new(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_exact_match() {
        let mounts = mounts(&[("/data", "/vol/data")]);
        assert_eq!(
            resolve_host_dir("/data", &mounts),
            Some("/vol/data".to_string())
        );
    }

    #[test]
    fn test_ancestor_match() {
        let mounts = mounts(&[("/data", "/vol/data")]);
        assert_eq!(
            resolve_host_dir("/data/sub", &mounts),
            Some("/vol/data/sub".to_string())
        );
        assert_eq!(
            resolve_host_dir("/data/sub/deep", &mounts),
            Some("/vol/data/sub/deep".to_string())
        );
    }

    #[test]
    fn test_longest_destination_wins() {
        let mounts = mounts(&[("/data", "/vol/data"), ("/data/sub", "/vol/other")]);
        assert_eq!(
            resolve_host_dir("/data/sub", &mounts),
            Some("/vol/other".to_string())
        );
    }

    #[test]
    fn test_unmounted_path() {
        let mounts = mounts(&[("/data", "/vol/data")]);
        assert_eq!(resolve_host_dir("/nowhere", &mounts), None);
    }

    // if resolve(p) finds a mount, resolve(q) for q under p also finds one
    #[test]
    fn test_resolution_is_monotone() {
        let mounts = mounts(&[("/data", "/vol/data")]);
        assert!(resolve_host_dir("/data/a", &mounts).is_some());
        assert!(resolve_host_dir("/data/a/b", &mounts).is_some());
        assert!(resolve_host_dir("/data/a/b/c", &mounts).is_some());
    }
}
