use async_trait::async_trait;
#[cfg(test)] use mockall::automock;


/// A [Monitor] controls the background activity of a group of connections, typically all
///  connections created by one transport. Monitors are started and stopped as a group through the
///  [MonitorCache](crate::monitor::monitor_cache::MonitorCache).
///
/// Both operations must be idempotent.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Monitor: Send + Sync + 'static {
    async fn start_monitoring(&self) -> anyhow::Result<()>;
    async fn stop_monitoring(&self) -> anyhow::Result<()>;
}
