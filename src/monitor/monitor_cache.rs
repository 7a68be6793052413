use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::monitor::monitor::Monitor;


/// The process-wide gate for background activity: it holds all monitors registered by the
///  caches, and starts or stops them together.
///
/// A single [MonitorCache] is shared by all caches of a router. Registration and start / stop
///  are serialized by a lock, so a monitor registered concurrently with a start is either started
///  by the start or at registration, but never missed and never started twice.
#[derive(Default)]
pub struct MonitorCache {
    state: Mutex<MonitorCacheState>,
}

#[derive(Default)]
struct MonitorCacheState {
    monitors: Vec<Arc<dyn Monitor>>,
    running: bool,
}

impl MonitorCache {
    pub fn new() -> MonitorCache {
        Default::default()
    }

    /// Adding a monitor that is already registered is a no-op. If monitoring is running, the
    ///  monitor is started right away.
    pub async fn add_monitor(&self, monitor: Arc<dyn Monitor>) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state.monitors.iter().any(|m| Arc::ptr_eq(m, &monitor)) {
            return Ok(());
        }

        if state.running {
            debug!("monitoring is running - starting newly added monitor");
            monitor.start_monitoring().await?;
        }
        state.monitors.push(monitor);
        Ok(())
    }

    pub async fn contains(&self, monitor: &Arc<dyn Monitor>) -> bool {
        self.state.lock().await
            .monitors.iter()
            .any(|m| Arc::ptr_eq(m, monitor))
    }

    /// Unregisters a monitor, stopping it if monitoring is running. Returns `false` if the
    ///  monitor was not registered.
    pub async fn remove_monitor(&self, monitor: &Arc<dyn Monitor>) -> bool {
        let mut state = self.state.lock().await;
        let Some(idx) = state.monitors.iter().position(|m| Arc::ptr_eq(m, monitor)) else {
            return false;
        };
        let removed = state.monitors.remove(idx);
        if state.running {
            if let Err(e) = removed.stop_monitoring().await {
                warn!(error = ?e, "error stopping removed monitor");
            }
        }
        true
    }

    /// Starts all monitors. If one of them fails to start, the ones started so far are stopped
    ///  again, and monitoring remains stopped.
    pub async fn start_all_monitors(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state.running {
            return Ok(());
        }

        for (idx, monitor) in state.monitors.iter().enumerate() {
            if let Err(e) = monitor.start_monitoring().await {
                for started in &state.monitors[..idx] {
                    if let Err(e) = started.stop_monitoring().await {
                        warn!(error = ?e, "error stopping monitor after failed start");
                    }
                }
                return Err(e);
            }
        }

        state.running = true;
        info!(num_monitors = state.monitors.len(), "started monitoring");
        Ok(())
    }

    /// Stops all monitors. Errors stopping individual monitors are logged, and the remaining
    ///  monitors are stopped regardless.
    pub async fn stop_all_monitors(&self) {
        let mut state = self.state.lock().await;
        if !state.running {
            return;
        }

        for monitor in &state.monitors {
            if let Err(e) = monitor.stop_monitoring().await {
                warn!(error = ?e, "error stopping monitor");
            }
        }
        state.running = false;
        info!("stopped monitoring");
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await
            .running
    }

    pub async fn num_monitors(&self) -> usize {
        self.state.lock().await
            .monitors.len()
    }
}
