use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, trace};

use crate::cache::factory_registry::FactoryRegistry;
use crate::connection::directional::SenderFactory;
use crate::correlation::pending_requests::PendingRequests;
use crate::correlation::sender::Sender;
use crate::error::RouterError;
use crate::messaging::address::TransportKind;
use crate::messaging::message::Message;
use crate::messaging::package::PackageFactory;
use crate::monitor::monitor_cache::MonitorCache;
use crate::routing::request_router::RequestRouter;
use crate::routing::routing::SenderRouting;


/// Resolves outbound requests to sender connections. Senders are created lazily, on first use of
///  their routing, and cached per routing.
///
/// The map lock is only held to look up a routing's cell. Creating a sender happens outside of
///  it, so a slow connect for one routing does not hold up requests on other routings, and
///  concurrent first requests on the same routing wait for a single connect.
pub struct SenderCache {
    router: Arc<RequestRouter>,
    package_factory: PackageFactory,
    default_timeout: Duration,
    factories: FactoryRegistry<dyn SenderFactory>,
    senders: Mutex<FxHashMap<SenderRouting, Arc<OnceCell<Arc<Sender>>>>>,
}

impl SenderCache {
    pub fn new(router: Arc<RequestRouter>, monitors: Arc<MonitorCache>, package_factory: PackageFactory, default_timeout: Duration) -> SenderCache {
        SenderCache {
            router,
            package_factory,
            default_timeout,
            factories: FactoryRegistry::new("sender", monitors),
            senders: Default::default(),
        }
    }

    pub async fn add_factory(&self, factory: Arc<dyn SenderFactory>) -> Result<(), RouterError> {
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

    /// Creates the sender for a routing eagerly, rather than on first use.
    pub async fn add_sender(&self, routing: &SenderRouting) -> Result<(), RouterError> {
        self.sender_for_routing(routing).await?;
        Ok(())
    }

    /// Returns the sender for `T`'s routing, creating it if necessary. Fails if there is no
    ///  routing for `T`, or no factory for its transport.
    pub async fn sender_for<T: Message>(&self) -> Result<Arc<Sender>, RouterError> {
        let routing = self.router.routing_for::<T>().await
            .ok_or_else(|| RouterError::RoutingNotFound(T::type_tag()))?;
        self.sender_for_routing(&routing).await
    }

    async fn sender_for_routing(&self, routing: &SenderRouting) -> Result<Arc<Sender>, RouterError> {
        let cell = self.senders.lock().await
            .entry(routing.clone())
            .or_default()
            .clone();

        let sender = cell.get_or_try_init(|| self.create_sender(routing)).await?;
        Ok(sender.clone())
    }

    async fn create_sender(&self, routing: &SenderRouting) -> Result<Arc<Sender>, RouterError> {
        let factory = self.factories.get(routing.transport).await?;
        let pending = Arc::new(PendingRequests::new());
        let connection = factory.create_sender(&routing.address, pending.clone()).await?;

        debug!(%routing, "created sender");
        Ok(Arc::new(Sender::new(connection, pending)))
    }

    /// Sends a request and waits for the response, using the default timeout.
    pub async fn send<Req: Message, Resp: Message>(&self, request: &Req) -> Result<Resp, RouterError> {
        self.send_with_timeout(request, self.default_timeout).await
    }

    /// Sends a request and waits for the response. If no response arrives within `timeout`,
    ///  this fails with [RouterError::Timeout].
    pub async fn send_with_timeout<Req: Message, Resp: Message>(&self, request: &Req, timeout: Duration) -> Result<Resp, RouterError> {
        let sender = self.sender_for::<Req>().await?;
        trace!(?request, ?timeout, "sending request");
        let response = sender.send_and_receive(&self.package_factory, request, timeout).await?;
        self.package_factory.extract_response(&response)
    }

    pub async fn num_senders(&self) -> usize {
        self.senders.lock().await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }
}
