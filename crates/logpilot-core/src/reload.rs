//! Debounced shipper reload.
//!
//! Reload requests flow through a single-slot channel: senders try-send and
//! drop on contention, one worker serializes the actual reloads and
//! enforces a minimum interval between them. An in-flight reload picks up
//! every config written before it starts, so a dropped request costs at
//! most one extra reload to reach quiescence.

use crate::shipper::Shipper;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info, warn};

/// Minimum interval between two shipper reloads.
pub const RELOAD_INTERVAL: Duration = Duration::from_secs(30);

/// Engine state shared between the event loop and the reload worker.
#[derive(Debug)]
pub struct EngineState {
    pub last_reload: Instant,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            last_reload: Instant::now(),
        }
    }
}

/// Cheap-to-clone sender half of the reload slot.
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    tx: mpsc::Sender<()>,
}

impl ReloadHandle {
    /// Request a reload. Non-blocking; a request arriving while the slot is
    /// occupied is dropped.
    pub fn request(&self) {
        match self.tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => info!("Another load is pending"),
            Err(TrySendError::Closed(())) => warn!("reload worker is gone, dropping request"),
        };
    }
}

/// Create the single-slot reload channel.
pub fn reload_channel() -> (ReloadHandle, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (ReloadHandle { tx }, rx)
}

/// Long-lived worker draining the reload slot.
pub struct ReloadWorker {
    rx: mpsc::Receiver<()>,
    shipper: Arc<dyn Shipper>,
    state: Arc<Mutex<EngineState>>,
}

impl ReloadWorker {
    pub fn new(
        rx: mpsc::Receiver<()>,
        shipper: Arc<dyn Shipper>,
        state: Arc<Mutex<EngineState>>,
    ) -> Self {
        Self { rx, shipper, state }
    }

    /// Receive reload requests until every sender is gone. Each reload holds
    /// the engine mutex and waits out the remainder of [`RELOAD_INTERVAL`]
    /// since the previous one.
    pub async fn run(mut self) {
        info!("Reload worker is ready");
        while self.rx.recv().await.is_some() {
            let mut state = self.state.lock().await;
            info!("Reload {}", self.shipper.name());
            let elapsed = state.last_reload.elapsed();
            if elapsed < RELOAD_INTERVAL {
                sleep(RELOAD_INTERVAL - elapsed).await;
            }
            info!("Start reloading");
            if let Err(e) = self.shipper.reload().await {
                error!("reload {} error: {e}", self.shipper.name());
            }
            state.last_reload = Instant::now();
        }
    }
}
