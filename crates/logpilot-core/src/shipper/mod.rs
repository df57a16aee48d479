//! Shipper lifecycle control.
//!
//! The engine drives an external log-forwarding subprocess through the
//! [`Shipper`] capability surface. Two strategies exist: the stream-based
//! filebeat variant tears per-container config down immediately on destroy,
//! the batch-based fluentd variant defers teardown behind a flush grace
//! period.

mod filebeat;
mod fluentd;

pub use filebeat::FilebeatShipper;
pub use fluentd::FluentdShipper;

use crate::config::ShipperKind;
use crate::error::Result;
use crate::reload::ReloadHandle;
use async_trait::async_trait;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Capability surface of a shipper controller.
#[async_trait]
pub trait Shipper: Send + Sync {
    fn name(&self) -> &'static str;

    /// Launch the shipper subprocess. Returns
    /// [`PilotError::AlreadyStarted`](crate::error::PilotError::AlreadyStarted)
    /// when it is already running; callers treat that as success.
    async fn start(&self) -> Result<()>;

    /// Make config changes under [`conf_home`](Shipper::conf_home) active.
    async fn reload(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Directory scanned by the shipper for per-container configs.
    fn conf_home(&self) -> &Path;

    /// Per-container config file path.
    fn conf_path_of(&self, container_id: &str) -> PathBuf;

    /// Filename suffix of per-container config files; the engine's startup
    /// cleanup only removes files carrying it.
    fn conf_file_suffix(&self) -> &'static str;

    /// Tear down the per-container config after the container is destroyed.
    async fn on_destroy_event(&self, container_id: &str) -> Result<()>;

    /// The container came back before teardown completed; cancel any
    /// pending deferred removal.
    async fn on_start_event(&self, _container_id: &str) {}
}

/// Build the shipper selected by configuration.
pub fn new_shipper(kind: ShipperKind, reload: ReloadHandle) -> Arc<dyn Shipper> {
    match kind {
        ShipperKind::Filebeat => Arc::new(FilebeatShipper::new(reload)),
        ShipperKind::Fluentd => Arc::new(FluentdShipper::new(reload)),
    }
}

/// Probe whether a previously spawned process is still alive.
pub(crate) fn process_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}
