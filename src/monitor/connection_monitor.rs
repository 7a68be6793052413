use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::connection::connection::Connection;
use crate::messaging::address::TransportKind;
use crate::monitor::monitor::Monitor;


/// A [Monitor] for the connections of a transport. Starting it initializes all tracked
///  connections and spawns a liveness loop that periodically re-initializes connections that
///  are not connected. Stopping it cancels the loop and terminates all connections.
pub struct ConnectionMonitor {
    transport: TransportKind,
    liveness_interval: Duration,
    connections: Arc<RwLock<Vec<Arc<dyn Connection>>>>,
    cancel_sender: broadcast::Sender<()>,
    liveness_loop: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    pub fn new(transport: TransportKind, liveness_interval: Duration) -> ConnectionMonitor {
        let (cancel_sender, _) = broadcast::channel(1);
        ConnectionMonitor {
            transport,
            liveness_interval,
            connections: Default::default(),
            cancel_sender,
            liveness_loop: Default::default(),
        }
    }

    /// Adds a connection to the monitored set, initializing it immediately if the monitor is
    ///  running. If that initialization fails, the liveness loop retries it.
    pub async fn track(&self, connection: Arc<dyn Connection>) {
        let liveness_loop = self.liveness_loop.lock().await;
        self.connections.write().await
            .push(connection.clone());

        if liveness_loop.is_some() {
            if let Err(e) = connection.initialize_connection().await {
                warn!(transport = %self.transport, ?connection, error = ?e, "error initializing connection - leaving it to the liveness loop");
            }
        }
    }

    pub async fn num_connections(&self) -> usize {
        self.connections.read().await
            .len()
    }

    async fn run_liveness_loop(
        transport: TransportKind,
        interval: Duration,
        connections: Arc<RwLock<Vec<Arc<dyn Connection>>>>,
        mut cancel_receiver: broadcast::Receiver<()>,
    ) {
        trace!(%transport, "starting liveness loop");
        loop {
            tokio::select! {
                _ = sleep(interval) => {
                    let connections = connections.read().await.clone();
                    for connection in connections {
                        if connection.is_connected().await {
                            continue;
                        }
                        debug!(%transport, ?connection, "re-initializing disconnected connection");
                        if let Err(e) = connection.initialize_connection().await {
                            warn!(%transport, ?connection, error = ?e, "error re-initializing connection");
                        }
                    }
                }
                _ = cancel_receiver.recv() => break,
            }
        }
        trace!(%transport, "liveness loop terminated");
    }
}

#[async_trait]
impl Monitor for ConnectionMonitor {
    async fn start_monitoring(&self) -> anyhow::Result<()> {
        let mut liveness_loop = self.liveness_loop.lock().await;
        if liveness_loop.is_some() {
            return Ok(());
        }

        let connections = self.connections.read().await.clone();
        for (idx, connection) in connections.iter().enumerate() {
            if let Err(e) = connection.initialize_connection().await {
                for initialized in &connections[..idx] {
                    if let Err(e) = initialized.terminate_connection().await {
                        warn!(transport = %self.transport, error = ?e, "error terminating connection after failed start");
                    }
                }
                return Err(e);
            }
        }

        let cancel_receiver = self.cancel_sender.subscribe();
        *liveness_loop = Some(tokio::spawn(Self::run_liveness_loop(
            self.transport,
            self.liveness_interval,
            self.connections.clone(),
            cancel_receiver,
        )));

        info!(transport = %self.transport, num_connections = connections.len(), "started monitoring");
        Ok(())
    }

    async fn stop_monitoring(&self) -> anyhow::Result<()> {
        let mut liveness_loop = self.liveness_loop.lock().await;
        let Some(handle) = liveness_loop.take() else {
            return Ok(());
        };

        if let Err(err) = self.cancel_sender.send(()) {
            warn!(?err, "error canceling liveness loop");
            handle.abort();
        }
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                warn!(transport = %self.transport, error = ?e, "liveness loop terminated abnormally");
            }
        }

        for connection in self.connections.read().await.iter() {
            if let Err(e) = connection.terminate_connection().await {
                warn!(transport = %self.transport, ?connection, error = ?e, "error terminating connection");
            }
        }

        info!(transport = %self.transport, "stopped monitoring");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::connection::ConnectionState;
    use crate::messaging::address::Address;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TEST: TransportKind = TransportKind::new("test");

    #[derive(Debug, Default)]
    struct FlakyConnection {
        state: ConnectionState,
        failures_left: AtomicUsize,
        binds: AtomicUsize,
    }

    #[async_trait]
    impl Connection for FlakyConnection {
        fn state(&self) -> &ConnectionState {
            &self.state
        }

        async fn socket_add(&self, _address: &Address) -> anyhow::Result<()> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(anyhow!("address in use"));
            }
            self.binds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn socket_remove(&self, _address: &Address) -> anyhow::Result<()> {
            Ok(())
        }
    }

    async fn connection(failures: usize) -> Arc<FlakyConnection> {
        let connection = Arc::new(FlakyConnection {
            failures_left: AtomicUsize::new(failures),
            ..Default::default()
        });
        connection.add_address(Address::inproc("x")).await.unwrap();
        connection
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let monitor = ConnectionMonitor::new(TEST, Duration::from_millis(10));
        let c = connection(0).await;
        monitor.track(c.clone()).await;
        assert!(!c.is_connected().await);

        monitor.start_monitoring().await.unwrap();
        monitor.start_monitoring().await.unwrap();
        assert!(c.is_connected().await);
        assert_eq!(c.binds.load(Ordering::SeqCst), 1);

        monitor.stop_monitoring().await.unwrap();
        monitor.stop_monitoring().await.unwrap();
        assert!(!c.is_connected().await);
    }

    #[tokio::test]
    async fn test_connection_tracked_while_running_is_initialized() {
        let monitor = ConnectionMonitor::new(TEST, Duration::from_secs(60));
        monitor.start_monitoring().await.unwrap();

        let c = connection(0).await;
        monitor.track(c.clone()).await;
        assert!(c.is_connected().await);
        assert_eq!(monitor.num_connections().await, 1);

        monitor.stop_monitoring().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_loop_reconnects() {
        let monitor = ConnectionMonitor::new(TEST, Duration::from_millis(100));
        monitor.start_monitoring().await.unwrap();

        // initialization on tracking fails, the liveness loop retries
        let c = connection(1).await;
        monitor.track(c.clone()).await;
        assert!(!c.is_connected().await);

        sleep(Duration::from_millis(150)).await;
        assert!(c.is_connected().await);

        c.terminate_connection().await.unwrap();
        assert!(!c.is_connected().await);

        sleep(Duration::from_millis(150)).await;
        assert!(c.is_connected().await);

        monitor.stop_monitoring().await.unwrap();
    }
}
