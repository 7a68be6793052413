use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::RouterError;
use crate::messaging::address::TransportKind;
use crate::monitor::monitor::Monitor;
use crate::monitor::monitor_cache::MonitorCache;


/// One factory per transport kind. Registering a second factory for a kind is a configuration
///  error and leaves the first one in place.
///
/// A factory's monitor is registered with the [MonitorCache] before the factory becomes
///  visible, so a factory is never usable without its monitor. If the monitor cannot be
///  registered, the factory is not added either.
pub(crate) struct FactoryRegistry<F: ?Sized> {
    cache: &'static str,
    monitors: Arc<MonitorCache>,
    factories: RwLock<FxHashMap<TransportKind, Arc<F>>>,
}

impl<F: ?Sized + Send + Sync> FactoryRegistry<F> {
    pub fn new(cache: &'static str, monitors: Arc<MonitorCache>) -> FactoryRegistry<F> {
        FactoryRegistry {
            cache,
            monitors,
            factories: Default::default(),
        }
    }

    pub async fn add(&self, transport: TransportKind, factory: Arc<F>, monitor: Arc<dyn Monitor>) -> Result<(), RouterError> {
        let mut factories = self.factories.write().await;
        if factories.contains_key(&transport) {
            return Err(RouterError::FactoryAlreadyRegistered(transport));
        }
        self.monitors.add_monitor(monitor).await?;
        factories.insert(transport, factory);
        debug!(cache = self.cache, %transport, "registered factory");
        Ok(())
    }

    pub async fn get(&self, transport: TransportKind) -> Result<Arc<F>, RouterError> {
        self.factories.read().await
            .get(&transport)
            .cloned()
            .ok_or(RouterError::MissingFactory {
                transport,
                cache: self.cache,
            })
    }

    pub async fn contains(&self, transport: TransportKind) -> bool {
        self.factories.read().await
            .contains_key(&transport)
    }

    /// Unregisters a factory without touching its monitor, which may be shared with other
    ///  factories.
    pub async fn remove(&self, transport: TransportKind) -> Option<Arc<F>> {
        let removed = self.factories.write().await
            .remove(&transport);
        if removed.is_some() {
            debug!(cache = self.cache, %transport, "unregistered factory");
        }
        removed
    }
}
