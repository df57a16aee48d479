//! Stream-based shipper variant.
//!
//! Filebeat watches its prospector directory on its own (the base
//! configuration enables config reloading), so `reload` has nothing to
//! signal; the controller's job is supervising the subprocess and removing
//! per-container prospector files as containers go away.

use crate::error::{PilotError, Result};
use crate::reload::ReloadHandle;
use crate::shipper::{process_alive, Shipper};
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const FILEBEAT_EXEC: &str = "/usr/bin/filebeat";
const FILEBEAT_BASE_CONF: &str = "/etc/filebeat/filebeat.yml";
const FILEBEAT_CONF_HOME: &str = "/etc/filebeat/prospectors.d";
const CONF_SUFFIX: &str = ".yml";

pub struct FilebeatShipper {
    conf_home: PathBuf,
    reload: ReloadHandle,
    pid: Arc<Mutex<Option<i32>>>,
}

impl FilebeatShipper {
    pub fn new(reload: ReloadHandle) -> Self {
        Self::with_conf_home(reload, FILEBEAT_CONF_HOME)
    }

    /// Use a non-default prospector directory.
    pub fn with_conf_home(reload: ReloadHandle, conf_home: impl Into<PathBuf>) -> Self {
        Self {
            conf_home: conf_home.into(),
            reload,
            pid: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl Shipper for FilebeatShipper {
    fn name(&self) -> &'static str {
        "filebeat"
    }

    async fn start(&self) -> Result<()> {
        let mut pid = self.pid.lock().await;
        if let Some(running) = *pid {
            if process_alive(running) {
                return Err(PilotError::AlreadyStarted);
            }
        }

        info!("starting filebeat: {FILEBEAT_EXEC} -c {FILEBEAT_BASE_CONF}");
        let mut child = Command::new(FILEBEAT_EXEC)
            .arg("-c")
            .arg(FILEBEAT_BASE_CONF)
            .spawn()?;
        *pid = child.id().and_then(|id| i32::try_from(id).ok());

        let slot = Arc::clone(&self.pid);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => warn!("filebeat exited: {status}"),
                Err(e) => warn!("filebeat wait error: {e}"),
            }
            *slot.lock().await = None;
        });
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        debug!("filebeat watches {}, nothing to signal", self.conf_home.display());
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
        let path = self.conf_path_of(container_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.reload.request();
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} has no config to remove", container_id);
                Ok(())
            }
            Err(e) => {
                warn!("removing {} log config failure: {e}", container_id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::reload_channel;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_conf_paths() {
        let (reload, _rx) = reload_channel();
        let shipper = FilebeatShipper::new(reload);
        assert_eq!(shipper.conf_home(), Path::new(FILEBEAT_CONF_HOME));
        assert_eq!(
            shipper.conf_path_of("abc"),
            Path::new(FILEBEAT_CONF_HOME).join("abc.yml")
        );
        assert_eq!(shipper.conf_file_suffix(), ".yml");
    }

    #[tokio::test]
    async fn test_destroy_removes_config_and_requests_reload() {
        let dir = TempDir::new().unwrap();
        let (reload, mut rx) = reload_channel();
        let shipper = FilebeatShipper::with_conf_home(reload, dir.path());

        let conf = shipper.conf_path_of("abc");
        std::fs::write(&conf, "config").unwrap();

        shipper.on_destroy_event("abc").await.unwrap();
        assert!(!conf.exists());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_destroy_without_config_is_quiet() {
        let dir = TempDir::new().unwrap();
        let (reload, mut rx) = reload_channel();
        let shipper = FilebeatShipper::with_conf_home(reload, dir.path());

        shipper.on_destroy_event("missing").await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
