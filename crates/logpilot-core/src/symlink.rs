//! Volume symlink tree.
//!
//! When enabled, every container's volume mountpoints are exposed under a
//! stable `<base>/acs/log/<app>/<service>/<containerId>/<volume>` tree so
//! host-side tooling can discover container logs without consulting the
//! runtime. The tree itself is the bookkeeping: garbage collection walks it
//! and removes container directories no longer in the inventory.

use crate::runtime::{ContainerRecord, ContainerRuntime, MOUNT_TYPE_VOLUME};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};

/// Root of the symlink tree, relative to the host-mount base directory.
pub const SYMLINK_ROOT: &str = "acs/log";

pub struct SymlinkManager {
    enabled: bool,
    base: PathBuf,
    runtime: Arc<dyn ContainerRuntime>,
}

impl SymlinkManager {
    pub fn new(base: impl Into<PathBuf>, enabled: bool, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            enabled,
            base: base.into(),
            runtime,
        }
    }

    fn root(&self) -> PathBuf {
        self.base.join(SYMLINK_ROOT)
    }

    /// Create symlinks for the container's volume mounts. Failures are
    /// logged and never abort the container's configuration.
    pub async fn create_for(
        &self,
        record: &ContainerRecord,
        descriptor: &BTreeMap<String, String>,
    ) {
        if !self.enabled {
            return;
        }

        let root = self.root();
        if !root.exists() {
            if let Err(e) = make_dir_all(&root) {
                error!("create {} error: {e}", root.display());
            }
        }

        let app = descriptor.get("docker_app").map_or("", String::as_str);
        let service = descriptor.get("docker_service").map_or("", String::as_str);
        let container_dir = join_non_empty(&root, &[app, service, &record.id]);

        // first writer wins per mountpoint
        let mut links: HashMap<String, PathBuf> = HashMap::new();
        for mount in &record.mounts {
            if mount.kind != MOUNT_TYPE_VOLUME {
                continue;
            }
            let volume = match self.runtime.inspect_volume(&mount.name).await {
                Ok(volume) => volume,
                Err(e) => {
                    error!("inspect volume {} error: {e}", mount.name);
                    continue;
                }
            };
            links
                .entry(volume.mountpoint)
                .or_insert_with(|| container_dir.join(&volume.name));
        }

        if links.is_empty() {
            return;
        }

        if !container_dir.exists() {
            if let Err(e) = make_dir_all(&container_dir) {
                error!("create {} error: {e}", container_dir.display());
                return;
            }
        }

        for (mountpoint, link) in links {
            match std::os::unix::fs::symlink(&mountpoint, &link) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => error!("create symlink {} error: {e}", link.display()),
            }
        }
    }

    /// Remove the container's symlink directories wherever they appear in
    /// the `<app>/<service>` hierarchy.
    pub fn remove_container(&self, container_id: &str) {
        if !self.enabled {
            return;
        }
        for app in subdirectories(&self.root()) {
            for service in subdirectories(&app) {
                let dir = service.join(container_id);
                if dir.exists() {
                    if let Err(e) = fs::remove_dir_all(&dir) {
                        warn!("remove error: {e}");
                    }
                }
            }
        }
    }

    /// Remove symlink directories of containers no longer in the inventory.
    pub fn gc(&self, live: &HashSet<String>) {
        if !self.enabled {
            return;
        }
        for container_id in self.list_container_ids() {
            if !live.contains(&container_id) {
                self.remove_container(&container_id);
            }
        }
    }

    /// Container ids currently present in the tree.
    pub fn list_container_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        for app in subdirectories(&self.root()) {
            for service in subdirectories(&app) {
                for container in subdirectories(&service) {
                    if let Some(name) = container.file_name() {
                        ids.insert(name.to_string_lossy().into_owned());
                    }
                }
            }
        }
        ids
    }
}

fn make_dir_all(path: &Path) -> std::io::Result<()> {
    fs::DirBuilder::new().recursive(true).mode(0o777).create(path)
}

fn join_non_empty(root: &Path, segments: &[&str]) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in segments {
        if !segment.is_empty() {
            path.push(segment);
        }
    }
    path
}

fn subdirectories(path: &Path) -> Vec<PathBuf> {
    if !path.exists() {
        return Vec::new();
    }
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("read {} error: {e}", path.display());
            return Vec::new();
        }
    };
    entries
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .map(|entry| entry.path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PilotError, Result};
    use crate::runtime::{ContainerSummary, LifecycleEvent, MountRecord, VolumeRecord};
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use std::io::ErrorKind;
    use tempfile::TempDir;

    struct VolumeOnlyRuntime {
        volumes: HashMap<String, String>,
    }

    #[async_trait]
    impl ContainerRuntime for VolumeOnlyRuntime {
        async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
            Ok(Vec::new())
        }
        async fn inspect_container(&self, id: &str) -> Result<ContainerRecord> {
            Err(PilotError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                id.to_string(),
            )))
        }
        async fn inspect_volume(&self, name: &str) -> Result<VolumeRecord> {
            match self.volumes.get(name) {
                Some(mountpoint) => Ok(VolumeRecord {
                    name: name.to_string(),
                    mountpoint: mountpoint.clone(),
                }),
                None => Err(PilotError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    name.to_string(),
                ))),
            }
        }
        fn events(&self) -> BoxStream<'static, Result<LifecycleEvent>> {
            Box::pin(stream::empty())
        }
    }

    fn manager(base: &Path, volumes: &[(&str, &str)]) -> SymlinkManager {
        let runtime = Arc::new(VolumeOnlyRuntime {
            volumes: volumes
                .iter()
                .map(|(name, mountpoint)| (name.to_string(), mountpoint.to_string()))
                .collect(),
        });
        SymlinkManager::new(base, true, runtime)
    }

    fn volume_record(id: &str, volume_names: &[&str]) -> ContainerRecord {
        ContainerRecord {
            id: id.to_string(),
            mounts: volume_names
                .iter()
                .map(|name| MountRecord {
                    destination: format!("/data/{name}"),
                    source: String::new(),
                    kind: MOUNT_TYPE_VOLUME.to_string(),
                    name: name.to_string(),
                })
                .collect(),
            ..ContainerRecord::default()
        }
    }

    fn descriptor(app: &str, service: &str) -> BTreeMap<String, String> {
        let mut descriptor = BTreeMap::new();
        if !app.is_empty() {
            descriptor.insert("docker_app".to_string(), app.to_string());
        }
        if !service.is_empty() {
            descriptor.insert("docker_service".to_string(), service.to_string());
        }
        descriptor
    }

    #[tokio::test]
    async fn test_create_and_remove() {
        let base = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let target_path = target.path().to_string_lossy().into_owned();
        let manager = manager(base.path(), &[("vol1", &target_path)]);

        let record = volume_record("cid1", &["vol1"]);
        manager.create_for(&record, &descriptor("shop", "web")).await;

        let link = base
            .path()
            .join(SYMLINK_ROOT)
            .join("shop/web/cid1/vol1");
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), target.path());

        // re-creating the same link is not an error
        manager.create_for(&record, &descriptor("shop", "web")).await;

        manager.remove_container("cid1");
        assert!(!link.exists());
        assert!(!base.path().join(SYMLINK_ROOT).join("shop/web/cid1").exists());
    }

    #[tokio::test]
    async fn test_no_volume_mounts_creates_nothing() {
        let base = TempDir::new().unwrap();
        let manager = manager(base.path(), &[]);

        let mut record = volume_record("cid1", &[]);
        record.mounts.push(MountRecord {
            destination: "/data".to_string(),
            source: "/vol/data".to_string(),
            kind: "bind".to_string(),
            name: String::new(),
        });
        manager.create_for(&record, &descriptor("shop", "web")).await;

        assert!(!base.path().join(SYMLINK_ROOT).join("shop").exists());
    }

    #[tokio::test]
    async fn test_gc_removes_orphans() {
        let base = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let target_path = target.path().to_string_lossy().into_owned();
        let manager = manager(base.path(), &[("vol1", &target_path)]);

        manager
            .create_for(&volume_record("live", &["vol1"]), &descriptor("a", "s"))
            .await;
        manager
            .create_for(&volume_record("stale", &["vol1"]), &descriptor("a", "s"))
            .await;

        let live: HashSet<String> = [String::from("live")].into_iter().collect();
        manager.gc(&live);

        let ids = manager.list_container_ids();
        assert!(ids.contains("live"));
        assert!(!ids.contains("stale"));
    }

    #[tokio::test]
    async fn test_disabled_manager_is_inert() {
        let base = TempDir::new().unwrap();
        let runtime = Arc::new(VolumeOnlyRuntime {
            volumes: HashMap::new(),
        });
        let manager = SymlinkManager::new(base.path(), false, runtime);

        manager
            .create_for(&volume_record("cid1", &["vol1"]), &descriptor("a", "s"))
            .await;
        assert!(!base.path().join(SYMLINK_ROOT).exists());
    }
}
