use std::sync::Arc;

use futures::future::join_all;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::cache::factory_registry::FactoryRegistry;
use crate::connection::directional::{PublisherConnection, PublisherFactory};
use crate::error::RouterError;
use crate::messaging::address::{Address, TransportKind};
use crate::messaging::message::Message;
use crate::messaging::package::PackageFactory;
use crate::monitor::monitor_cache::MonitorCache;


/// Manages the publisher connections, at most one per address. Publishing broadcasts a topic to
///  all of them.
pub struct PublisherCache {
    package_factory: PackageFactory,
    factories: FactoryRegistry<dyn PublisherFactory>,
    publishers: Mutex<FxHashMap<Address, Arc<dyn PublisherConnection>>>,
}

impl PublisherCache {
    pub fn new(monitors: Arc<MonitorCache>, package_factory: PackageFactory) -> PublisherCache {
        PublisherCache {
            package_factory,
            factories: FactoryRegistry::new("publisher", monitors),
            publishers: Default::default(),
        }
    }

    pub async fn add_factory(&self, factory: Arc<dyn PublisherFactory>) -> Result<(), RouterError> {
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

    /// Binds a publisher at an address. Fails if there is a publisher at that address already, or
    ///  if there is no factory for the transport.
    pub async fn add_publisher(&self, transport: TransportKind, address: Address) -> Result<(), RouterError> {
        let mut publishers = self.publishers.lock().await;
        if publishers.contains_key(&address) {
            return Err(RouterError::AddressAlreadyBound(address));
        }

        let factory = self.factories.get(transport).await?;
        let publisher = factory.create_publisher(&address).await?;

        debug!(%transport, ?address, "created publisher");
        publishers.insert(address, publisher);
        Ok(())
    }

    /// Sends a topic through all publishers. This is best effort: failure on one publisher does
    ///  not keep the topic from being sent through the others, and it is logged rather than
    ///  returned. The result is the number of publishers that sent the topic successfully.
    pub async fn publish<T: Message>(&self, topic: &T) -> Result<usize, RouterError> {
        let package = self.package_factory.create_topic(topic)?;

        let publishers = self.publishers.lock().await
            .iter()
            .map(|(address, publisher)| (address.clone(), publisher.clone()))
            .collect::<Vec<_>>();
        trace!(?topic, num_publishers = publishers.len(), "publishing");

        let results = join_all(publishers.iter()
            .map(|(_, publisher)| publisher.publish(package.clone()))
        ).await;

        let mut num_published = 0;
        for ((address, _), result) in publishers.iter().zip(results) {
            match result {
                Ok(()) => num_published += 1,
                Err(e) => warn!(?address, error = %e, "error publishing topic"),
            }
        }
        Ok(num_published)
    }

    pub async fn addresses(&self) -> Vec<Address> {
        self.publishers.lock().await
            .keys()
            .cloned()
            .collect()
    }
}
