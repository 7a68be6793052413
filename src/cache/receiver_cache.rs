use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::cache::factory_registry::FactoryRegistry;
use crate::connection::callbacks::RequestTaskHandler;
use crate::connection::directional::{ReceiverConnection, ReceiverFactory};
use crate::dispatch::request_dispatcher::RequestDispatcher;
use crate::dispatch::request_task::RequestTask;
use crate::error::RouterError;
use crate::messaging::address::{Address, TransportKind};
use crate::monitor::monitor_cache::MonitorCache;


/// Manages the receiver connections that requests arrive on, at most one per address. Received
///  requests are handed to the [RequestDispatcher] on a separate task, so a receiver's polling is
///  never held up by request handling.
pub struct ReceiverCache {
    dispatcher: Arc<RequestDispatcher>,
    factories: FactoryRegistry<dyn ReceiverFactory>,
    receivers: Mutex<FxHashMap<Address, Arc<dyn ReceiverConnection>>>,
}

impl ReceiverCache {
    pub fn new(monitors: Arc<MonitorCache>, dispatcher: Arc<RequestDispatcher>) -> ReceiverCache {
        ReceiverCache {
            dispatcher,
            factories: FactoryRegistry::new("receiver", monitors),
            receivers: Default::default(),
        }
    }

    pub async fn add_factory(&self, factory: Arc<dyn ReceiverFactory>) -> Result<(), RouterError> {
        let monitor = factory.monitor();
        self.factories.add(factory.transport(), factory, monitor).await
    }

    pub(crate) async fn has_factory(&self, transport: TransportKind) -> bool {
        self.factories.contains(transport).await
    }

    pub(crate) async fn remove_factory(&self, transport: TransportKind) -> bool {
        self.factories.remove(transport).await
            .is_some()
    }

    /// Binds a receiver at an address. Fails if there is a receiver at that address already, or
    ///  if there is no factory for the transport.
    pub async fn add_receiver(&self, transport: TransportKind, address: Address) -> Result<(), RouterError> {
        let mut receivers = self.receivers.lock().await;
        if receivers.contains_key(&address) {
            return Err(RouterError::AddressAlreadyBound(address));
        }

        let factory = self.factories.get(transport).await?;
        let handler = Arc::new(DispatchingRequestHandler {
            dispatcher: self.dispatcher.clone(),
        });
        let receiver = factory.create_receiver(&address, handler).await?;

        debug!(%transport, ?address, "created receiver");
        receivers.insert(address, receiver);
        Ok(())
    }

    pub async fn addresses(&self) -> Vec<Address> {
        self.receivers.lock().await
            .keys()
            .cloned()
            .collect()
    }
}


struct DispatchingRequestHandler {
    dispatcher: Arc<RequestDispatcher>,
}

impl RequestTaskHandler for DispatchingRequestHandler {
    fn on_request(&self, task: RequestTask) {
        trace!(?task, "received request");
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.handle_task(task).await;
        });
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::package::PackageFactory;
    use crate::messaging::serializer::Serializer;
    use crate::test_util::loopback::{loopback_address, LoopbackHub, LoopbackTransport, LOOPBACK};
    use crate::test_util::stub::{failing_monitor, working_monitor, StubFactory};

    fn cache() -> (ReceiverCache, Arc<MonitorCache>) {
        let monitors = Arc::new(MonitorCache::new());
        let dispatcher = Arc::new(RequestDispatcher::new(PackageFactory::new(Serializer::Json, 1024)));
        (ReceiverCache::new(monitors.clone(), dispatcher), monitors)
    }

    #[tokio::test]
    async fn test_add_receiver() {
        let (cache, monitors) = cache();
        let hub = LoopbackHub::new();
        let transport = LoopbackTransport::new(hub.clone());
        cache.add_factory(transport.factory()).await.unwrap();
        assert_eq!(monitors.num_monitors().await, 1);

        cache.add_receiver(LOOPBACK, loopback_address("a")).await.unwrap();
        assert_eq!(cache.addresses().await, vec![loopback_address("a")]);
        assert!(!hub.is_bound(&loopback_address("a")));

        monitors.start_all_monitors().await.unwrap();
        assert!(hub.is_bound(&loopback_address("a")));

        monitors.stop_all_monitors().await;
        assert!(!hub.is_bound(&loopback_address("a")));
    }

    #[tokio::test]
    async fn test_duplicate_address() {
        let (cache, _) = cache();
        let transport = LoopbackTransport::new(LoopbackHub::new());
        cache.add_factory(transport.factory()).await.unwrap();

        cache.add_receiver(LOOPBACK, loopback_address("a")).await.unwrap();
        match cache.add_receiver(LOOPBACK, loopback_address("a")).await {
            Err(RouterError::AddressAlreadyBound(address)) => assert_eq!(address, loopback_address("a")),
            other => panic!("expected address already bound, was {:?}", other),
        }
        assert_eq!(transport.monitor().num_connections().await, 1);
    }

    #[tokio::test]
    async fn test_missing_and_duplicate_factory() {
        let (cache, monitors) = cache();
        assert!(matches!(cache.add_receiver(LOOPBACK, loopback_address("a")).await, Err(RouterError::MissingFactory { cache: "receiver", .. })));

        let transport = LoopbackTransport::new(LoopbackHub::new());
        cache.add_factory(transport.factory()).await.unwrap();
        assert!(matches!(cache.add_factory(transport.factory()).await, Err(RouterError::FactoryAlreadyRegistered(_))));
        assert_eq!(monitors.num_monitors().await, 1);
    }

    #[tokio::test]
    async fn test_factory_with_failing_monitor_is_not_registered() {
        let (cache, monitors) = cache();
        monitors.start_all_monitors().await.unwrap();
        let kind = TransportKind::new("stub");
        let hub = LoopbackHub::new();

        let failing = Arc::new(StubFactory::new(kind, hub.clone(), failing_monitor()));
        assert!(matches!(cache.add_factory(failing).await, Err(RouterError::Transport(_))));
        assert!(!cache.has_factory(kind).await);
        assert!(matches!(cache.add_receiver(kind, loopback_address("a")).await, Err(RouterError::MissingFactory { .. })));
        assert_eq!(monitors.num_monitors().await, 0);

        cache.add_factory(Arc::new(StubFactory::new(kind, hub, working_monitor()))).await.unwrap();
        assert_eq!(monitors.num_monitors().await, 1);
        cache.add_receiver(kind, loopback_address("a")).await.unwrap();

        monitors.stop_all_monitors().await;
    }
}
