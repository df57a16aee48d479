//! Container reconciliation loop.
//!
//! ```text
//!   Docker events ──> Pilot ──> label tree ──> LogConfig compile
//!                       │                          │
//!                       │                          v
//!                       │                    template render
//!                       │                          │
//!                       v                          v
//!                  symlink tree             ConfHome()/<cid>.*
//!                                                  │
//!                                                  v
//!                                         reload slot ──> worker ──> shipper
//! ```
//!
//! One full sweep at startup reconciles the on-disk config directory and the
//! symlink tree with the live container inventory; afterwards lifecycle
//! events drive incremental updates. Per-container failures are logged and
//! skipped, they never halt the loop.

use crate::config::Settings;
use crate::descriptor::{self, DescriptorExtension};
use crate::error::{PilotError, Result};
use crate::label_tree::{build_log_tree, env_to_labels};
use crate::log_config::{compile, LogConfig};
use crate::reload::{reload_channel, EngineState, ReloadHandle, ReloadWorker};
use crate::render::Renderer;
use crate::runtime::{ContainerRecord, ContainerRuntime, MountRecord};
use crate::shipper::{new_shipper, Shipper};
use crate::symlink::SymlinkManager;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const STATE_REMOVING: &str = "removing";

/// The reconciliation engine.
pub struct Pilot {
    renderer: Renderer,
    base: String,
    runtime: Arc<dyn ContainerRuntime>,
    shipper: Arc<dyn Shipper>,
    reload: ReloadHandle,
    reload_rx: std::sync::Mutex<Option<mpsc::Receiver<()>>>,
    state: Arc<Mutex<EngineState>>,
    symlinks: SymlinkManager,
    settings: Settings,
    extension: Option<Box<DescriptorExtension>>,
}

impl Pilot {
    /// Build an engine with the shipper selected by `settings`. Fails if
    /// the operator template does not parse.
    pub fn new(
        template: &str,
        base: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
        settings: Settings,
    ) -> Result<Self> {
        let kind = settings.shipper;
        Self::with_shipper(template, base, runtime, settings, |reload| {
            new_shipper(kind, reload)
        })
    }

    /// Build an engine around a caller-supplied shipper.
    pub fn with_shipper(
        template: &str,
        base: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
        settings: Settings,
        make_shipper: impl FnOnce(ReloadHandle) -> Arc<dyn Shipper>,
    ) -> Result<Self> {
        let renderer = Renderer::new(template)?;
        let base = base.into();
        let (reload, reload_rx) = reload_channel();
        let shipper = make_shipper(reload.clone());
        let symlinks = SymlinkManager::new(&base, settings.create_symlink, Arc::clone(&runtime));
        Ok(Self {
            renderer,
            base,
            runtime,
            shipper,
            reload,
            reload_rx: std::sync::Mutex::new(Some(reload_rx)),
            state: Arc::new(Mutex::new(EngineState::default())),
            symlinks,
            settings,
            extension: None,
        })
    }

    /// Install a hook that may add keys to every container descriptor.
    #[must_use]
    pub fn with_descriptor_extension(mut self, extension: Box<DescriptorExtension>) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn shipper(&self) -> &Arc<dyn Shipper> {
        &self.shipper
    }

    /// Run the engine: full sweep, shipper start, reload worker, then event
    /// dispatch until the event stream reaches EOF.
    pub async fn watch(&self) -> Result<()> {
        self.process_all_containers().await?;

        match self.shipper.start().await {
            Ok(()) => {}
            Err(PilotError::AlreadyStarted) => {
                info!("{} already started", self.shipper.name());
            }
            Err(e) => return Err(e),
        }

        self.state.lock().await.last_reload = Instant::now();
        let reload_rx = self
            .reload_rx
            .lock()
            .map_err(|_| PilotError::AlreadyStarted)?
            .take()
            .ok_or(PilotError::AlreadyStarted)?;
        tokio::spawn(
            ReloadWorker::new(reload_rx, Arc::clone(&self.shipper), Arc::clone(&self.state)).run(),
        );

        let mut events = self.runtime.events();
        loop {
            match events.next().await {
                Some(Ok(event)) => {
                    if let Err(e) = self.process_event(&event.action, &event.id).await {
                        error!("fail to process event: {} {}, {e}", event.action, event.id);
                    }
                }
                Some(Err(e)) => {
                    warn!("error: {e}");
                    events = self.runtime.events();
                }
                // stream EOF, callers decide whether to exit or restart
                None => return Ok(()),
            }
        }
    }

    /// Initial sweep: reconcile the config directory and symlink tree with
    /// the current inventory.
    pub async fn process_all_containers(&self) -> Result<()> {
        let inventory = {
            let _guard = self.state.lock().await;

            let containers = self.runtime.list_containers().await?;
            self.clean_configs().await?;

            let mut inventory = HashSet::new();
            for container in containers {
                inventory.insert(container.id.clone());
                if container.state == STATE_REMOVING {
                    continue;
                }
                let record = self.runtime.inspect_container(&container.id).await?;
                if let Err(e) = self.new_container(&record).await {
                    error!("fail to process container {}: {e}", record.name);
                }
            }
            inventory
        };

        self.symlinks.gc(&inventory);
        Ok(())
    }

    /// Remove per-container config files left over from a previous run.
    /// Only regular files carrying the shipper's config suffix are touched.
    async fn clean_configs(&self) -> Result<()> {
        let suffix = self.shipper.conf_file_suffix();
        let mut entries = tokio::fs::read_dir(self.shipper.conf_home()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.metadata().await?.is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().ends_with(suffix) {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    /// Compile, render and persist the configuration for one container.
    /// Containers declaring no log sources are skipped without error.
    pub async fn new_container(&self, record: &ContainerRecord) -> Result<()> {
        let descriptor =
            descriptor::project(record, &self.settings.node_name, self.extension.as_deref());

        let mut labels: BTreeMap<String, String> = record
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in env_to_labels(&record.env, &self.settings.log_prefixes) {
            labels.insert(key, value);
        }

        let tree = build_log_tree(&labels, &self.settings.log_prefixes)?;
        let mounts: HashMap<String, MountRecord> = record
            .mounts
            .iter()
            .map(|m| (m.destination.clone(), m.clone()))
            .collect();

        let mut configs: Vec<LogConfig> = Vec::new();
        for (name, node) in &tree.children {
            configs.push(compile(
                name,
                node,
                &record.log_path,
                &mounts,
                &self.base,
                self.settings.shipper,
            )?);
        }

        if configs.is_empty() {
            debug!("{} has no log config, skip", record.id);
            return Ok(());
        }

        self.symlinks.create_for(record, &descriptor).await;

        for config in &configs {
            info!("logs: {} = {:?}", record.id, config);
        }
        let rendered =
            self.renderer
                .render(&record.id, &descriptor, &configs, &self.settings.output)?;

        let conf_path = self.shipper.conf_path_of(&record.id);
        tokio::fs::write(&conf_path, rendered).await?;
        tokio::fs::set_permissions(&conf_path, std::fs::Permissions::from_mode(0o644)).await?;

        self.reload.request();
        Ok(())
    }

    /// Dispatch one lifecycle event.
    pub async fn process_event(&self, action: &str, container_id: &str) -> Result<()> {
        match action {
            "start" | "restart" => {
                debug!("Process container start event: {container_id}");
                self.shipper.on_start_event(container_id).await;
                if self.config_exists(container_id) {
                    debug!("{container_id} already exists, skip");
                    return Ok(());
                }
                let record = self.runtime.inspect_container(container_id).await?;
                self.new_container(&record).await
            }
            "destroy" => {
                debug!("Process container destroy event: {container_id}");
                if let Err(e) = self.del_container(container_id).await {
                    warn!("Process container destroy event error: {container_id}, {e}");
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn del_container(&self, container_id: &str) -> Result<()> {
        self.symlinks.remove_container(container_id);
        self.shipper.on_destroy_event(container_id).await
    }

    fn config_exists(&self, container_id: &str) -> bool {
        self.shipper.conf_path_of(container_id).exists()
    }
}
