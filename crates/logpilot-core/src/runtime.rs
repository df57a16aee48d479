//! Narrow interface around the container runtime.
//!
//! The engine only needs four capabilities: list, inspect, volume-inspect
//! and a lifecycle event stream filtered to container events. The trait
//! keeps the reconciliation loop testable without a live daemon; the
//! production implementation is a thin mapping over the Docker API.

use crate::error::{PilotError, Result};
use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;

/// Mount type of volume-backed mounts, as reported by the runtime.
pub const MOUNT_TYPE_VOLUME: &str = "volume";

/// One entry of `ListContainers`.
#[derive(Debug, Clone, Default)]
pub struct ContainerSummary {
    pub id: String,
    pub state: String,
}

/// One entry of a container's mount table.
#[derive(Debug, Clone, Default)]
pub struct MountRecord {
    /// In-container path.
    pub destination: String,
    /// Host path backing the mount.
    pub source: String,
    /// Mount type (`bind`, `volume`, ...).
    pub kind: String,
    /// Volume name for volume-typed mounts.
    pub name: String,
}

/// Immutable snapshot of an inspected container.
#[derive(Debug, Clone, Default)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub created: String,
    /// Host path of the container's stdout journal.
    pub log_path: String,
    pub labels: HashMap<String, String>,
    pub env: Vec<String>,
    pub mounts: Vec<MountRecord>,
}

/// A named volume and its host mountpoint.
#[derive(Debug, Clone)]
pub struct VolumeRecord {
    pub name: String,
    pub mountpoint: String,
}

/// One container lifecycle event.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub action: String,
    pub id: String,
}

/// Capability set the engine requires from the container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerRecord>;

    async fn inspect_volume(&self, name: &str) -> Result<VolumeRecord>;

    /// Subscribe to container lifecycle events. The stream ends on EOF;
    /// transient failures surface as `Err` items and the caller
    /// re-subscribes.
    fn events(&self) -> BoxStream<'static, Result<LifecycleEvent>>;
}

/// Docker-backed runtime adapter.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the standard environment (`DOCKER_HOST` or the local
    /// socket) and the client's default API version.
    pub fn connect() -> Result<Self> {
        Ok(Self {
            docker: Docker::connect_with_local_defaults()?,
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String>::default()))
            .await?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                state: c.state.unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerRecord> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        let config = response.config.unwrap_or_default();
        Ok(ContainerRecord {
            id: response.id.unwrap_or_default(),
            name: response.name.unwrap_or_default(),
            image: config.image.unwrap_or_default(),
            created: response.created.unwrap_or_default(),
            log_path: response.log_path.unwrap_or_default(),
            labels: config.labels.unwrap_or_default(),
            env: config.env.unwrap_or_default(),
            mounts: response
                .mounts
                .unwrap_or_default()
                .into_iter()
                .map(|m| MountRecord {
                    destination: m.destination.unwrap_or_default(),
                    source: m.source.unwrap_or_default(),
                    kind: m.typ.map(|t| t.to_string()).unwrap_or_default(),
                    name: m.name.unwrap_or_default(),
                })
                .collect(),
        })
    }

    async fn inspect_volume(&self, name: &str) -> Result<VolumeRecord> {
        let volume = self.docker.inspect_volume(name).await?;
        Ok(VolumeRecord {
            name: volume.name,
            mountpoint: volume.mountpoint,
        })
    }

    fn events(&self) -> BoxStream<'static, Result<LifecycleEvent>> {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        let options = EventsOptions::<String> {
            filters,
            ..EventsOptions::default()
        };
        self.docker
            .events(Some(options))
            .map(|message| match message {
                Ok(message) => Ok(LifecycleEvent {
                    action: message.action.unwrap_or_default(),
                    id: message
                        .actor
                        .and_then(|actor| actor.id)
                        .unwrap_or_default(),
                }),
                Err(e) => Err(PilotError::Api(e)),
            })
            .boxed()
    }
}
