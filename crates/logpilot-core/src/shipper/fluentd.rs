//! Batch-based shipper variant.
//!
//! Fluentd buffers records in flight, so per-container config teardown is
//! deferred behind a grace period to let buffers flush. Deferred removals
//! are keyed by container id: a container that comes back before its timer
//! fires keeps its config.

use crate::error::{PilotError, Result};
use crate::reload::ReloadHandle;
use crate::shipper::{process_alive, Shipper};
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const FLUENTD_EXEC: &str = "/usr/bin/fluentd";
const FLUENTD_BASE_CONF: &str = "/etc/fluentd/fluentd.conf";
const FLUENTD_PLUGINS: &str = "/etc/fluentd/plugins";
const FLUENTD_CONF_HOME: &str = "/etc/fluentd/conf.d";
const CONF_SUFFIX: &str = ".conf";

/// How long destroyed containers keep their config while buffers drain.
const REMOVE_GRACE_PERIOD: Duration = Duration::from_secs(15 * 60);

pub struct FluentdShipper {
    conf_home: PathBuf,
    reload: ReloadHandle,
    pid: Arc<Mutex<Option<i32>>>,
    removals: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl FluentdShipper {
    pub fn new(reload: ReloadHandle) -> Self {
        Self::with_conf_home(reload, FLUENTD_CONF_HOME)
    }

    /// Use a non-default config directory.
    pub fn with_conf_home(reload: ReloadHandle, conf_home: impl Into<PathBuf>) -> Self {
        Self {
            conf_home: conf_home.into(),
            reload,
            pid: Arc::new(Mutex::new(None)),
            removals: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl Shipper for FluentdShipper {
    fn name(&self) -> &'static str {
        "fluentd"
    }

    async fn start(&self) -> Result<()> {
        let mut pid = self.pid.lock().await;
        if let Some(running) = *pid {
            if process_alive(running) {
                return Err(PilotError::AlreadyStarted);
            }
        }

        info!("starting fluentd: {FLUENTD_EXEC} -c {FLUENTD_BASE_CONF} -p {FLUENTD_PLUGINS}");
        let mut child = Command::new(FLUENTD_EXEC)
            .arg("-c")
            .arg(FLUENTD_BASE_CONF)
            .arg("-p")
            .arg(FLUENTD_PLUGINS)
            .spawn()?;
        *pid = child.id().and_then(|id| i32::try_from(id).ok());

        let slot = Arc::clone(&self.pid);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => warn!("fluentd exited: {status}"),
                Err(e) => warn!("fluentd wait error: {e}"),
            }
            *slot.lock().await = None;
        });
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let pid = self.pid.lock().await;
        if let Some(running) = *pid {
            debug!("signalling fluentd pid {running}");
            kill(Pid::from_raw(running), Signal::SIGHUP)?;
        } else {
            warn!("fluentd is not running, skip reload");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut pid = self.pid.lock().await;
        if let Some(running) = pid.take() {
            kill(Pid::from_raw(running), Signal::SIGTERM)?;
        }
        Ok(())
    }

    fn conf_home(&self) -> &Path {
        &self.conf_home
    }

    fn conf_path_of(&self, container_id: &str) -> PathBuf {
        self.conf_home.join(format!("{container_id}{CONF_SUFFIX}"))
    }

    fn conf_file_suffix(&self) -> &'static str {
        CONF_SUFFIX
    }

    async fn on_destroy_event(&self, container_id: &str) -> Result<()> {
        let token = CancellationToken::new();
        {
            let mut removals = self.removals.lock().await;
            if let Some(previous) = removals.insert(container_id.to_string(), token.clone()) {
                previous.cancel();
            }
        }

        let path = self.conf_path_of(container_id);
        let reload = self.reload.clone();
        let removals = Arc::clone(&self.removals);
        let container_id = container_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!("removal of {} config cancelled", container_id);
                    return;
                }
                () = sleep(REMOVE_GRACE_PERIOD) => {}
            }
            {
                let mut removals = removals.lock().await;
                if token.is_cancelled() {
                    return;
                }
                removals.remove(&container_id);
            }
            info!("Try removing log config {container_id}");
            match tokio::fs::remove_file(&path).await {
                Ok(()) => reload.request(),
                Err(e) => warn!("removing {} log config failure: {e}", container_id),
            }
        });
        Ok(())
    }

    async fn on_start_event(&self, container_id: &str) {
        let mut removals = self.removals.lock().await;
        if let Some(token) = removals.remove(container_id) {
            token.cancel();
            debug!("{} came back, keeping its config", container_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::reload_channel;
    use tempfile::TempDir;

    fn test_shipper(dir: &TempDir) -> (FluentdShipper, tokio::sync::mpsc::Receiver<()>) {
        let (reload, rx) = reload_channel();
        (FluentdShipper::with_conf_home(reload, dir.path()), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_defers_removal() {
        let dir = TempDir::new().unwrap();
        let (shipper, mut rx) = test_shipper(&dir);

        let conf = shipper.conf_path_of("abc");
        std::fs::write(&conf, "config").unwrap();

        shipper.on_destroy_event("abc").await.unwrap();
        // still present until the grace period elapses
        assert!(conf.exists());
        assert!(rx.try_recv().is_err());

        // the reload request only fires once the grace period has elapsed
        // and the config file is gone
        rx.recv().await.unwrap();
        assert!(!conf.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_cancels_pending_removal() {
        let dir = TempDir::new().unwrap();
        let (shipper, mut rx) = test_shipper(&dir);

        let conf = shipper.conf_path_of("abc");
        std::fs::write(&conf, "config").unwrap();

        shipper.on_destroy_event("abc").await.unwrap();
        shipper.on_start_event("abc").await;

        sleep(REMOVE_GRACE_PERIOD * 2).await;
        assert!(conf.exists());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_destroy_replaces_timer() {
        let dir = TempDir::new().unwrap();
        let (shipper, mut rx) = test_shipper(&dir);

        let conf = shipper.conf_path_of("abc");
        std::fs::write(&conf, "config").unwrap();

        shipper.on_destroy_event("abc").await.unwrap();
        sleep(Duration::from_secs(60)).await;
        shipper.on_destroy_event("abc").await.unwrap();

        // first timer was replaced; file survives its original deadline
        sleep(REMOVE_GRACE_PERIOD - Duration::from_secs(30)).await;
        assert!(conf.exists());

        rx.recv().await.unwrap();
        assert!(!conf.exists());
    }

    #[tokio::test]
    async fn test_conf_paths() {
        let (reload, _rx) = reload_channel();
        let shipper = FluentdShipper::new(reload);
        assert_eq!(
            shipper.conf_path_of("abc"),
            Path::new(FLUENTD_CONF_HOME).join("abc.conf")
        );
        assert_eq!(shipper.conf_file_suffix(), ".conf");
    }
}
