//! Container descriptor projection.
//!
//! Flattens a container's identity into the reserved descriptor keys the
//! operator template indexes into (`docker_app`, `k8s_pod`, ...). Values
//! come from well-known orchestrator labels plus the record itself.

use crate::runtime::ContainerRecord;
use std::collections::BTreeMap;

pub const LABEL_PROJECT: &str = "com.docker.compose.project";
pub const LABEL_PROJECT_SWARM_MODE: &str = "com.docker.stack.namespace";
pub const LABEL_SERVICE: &str = "com.docker.compose.service";
pub const LABEL_SERVICE_SWARM_MODE: &str = "com.docker.swarm.service.name";
pub const LABEL_POD: &str = "io.kubernetes.pod.name";
pub const LABEL_K8S_POD_NAMESPACE: &str = "io.kubernetes.pod.namespace";
pub const LABEL_K8S_CONTAINER_NAME: &str = "io.kubernetes.container.name";
pub const LABEL_RANCHER_STACK: &str = "io.rancher.stack.name";
pub const LABEL_RANCHER_STACK_SERVICE: &str = "io.rancher.stack_service.name";

/// Hook applied to the finished descriptor. Must not mutate the record.
pub type DescriptorExtension = dyn Fn(&mut BTreeMap<String, String>, &ContainerRecord) + Send + Sync;

/// Insert `key -> value` unless either side is empty. A later non-empty
/// value for the same key wins.
pub fn put_if_not_empty(store: &mut BTreeMap<String, String>, key: &str, value: &str) {
    if key.is_empty() || value.is_empty() {
        return;
    }
    store.insert(key.to_string(), value.to_string());
}

/// Project a container record into a descriptor map.
pub fn project(
    record: &ContainerRecord,
    node_name: &str,
    extension: Option<&DescriptorExtension>,
) -> BTreeMap<String, String> {
    let label = |key: &str| record.labels.get(key).map_or("", String::as_str);

    let mut descriptor = BTreeMap::new();
    put_if_not_empty(&mut descriptor, "docker_app", label(LABEL_PROJECT));
    put_if_not_empty(&mut descriptor, "docker_app", label(LABEL_PROJECT_SWARM_MODE));
    put_if_not_empty(&mut descriptor, "docker_service", label(LABEL_SERVICE));
    put_if_not_empty(&mut descriptor, "docker_service", label(LABEL_SERVICE_SWARM_MODE));
    put_if_not_empty(&mut descriptor, "k8s_pod", label(LABEL_POD));
    put_if_not_empty(&mut descriptor, "k8s_pod_namespace", label(LABEL_K8S_POD_NAMESPACE));
    put_if_not_empty(&mut descriptor, "k8s_container_name", label(LABEL_K8S_CONTAINER_NAME));
    put_if_not_empty(&mut descriptor, "k8s_node_name", node_name);

    put_if_not_empty(
        &mut descriptor,
        "docker_container_name",
        record.name.trim_start_matches('/'),
    );
    put_if_not_empty(&mut descriptor, "docker_container_created", &record.created);
    put_if_not_empty(&mut descriptor, "docker_container_image", &record.image);
    put_if_not_empty(&mut descriptor, "docker_container_id", &record.id);

    put_if_not_empty(&mut descriptor, "rancher_stack", label(LABEL_RANCHER_STACK));
    put_if_not_empty(
        &mut descriptor,
        "rancher_stack_service",
        label(LABEL_RANCHER_STACK_SERVICE),
    );

    if let Some(extension) = extension {
        extension(&mut descriptor, record);
    }
    descriptor
}
