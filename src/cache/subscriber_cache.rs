use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::cache::factory_registry::FactoryRegistry;
use crate::connection::callbacks::TopicHandler;
use crate::connection::directional::{SubscriberConnection, SubscriberFactory};
use crate::dispatch::topic_dispatcher::TopicDispatcher;
use crate::error::RouterError;
use crate::messaging::address::{Address, TransportKind};
use crate::messaging::message::Message;
use crate::messaging::package::Package;
use crate::monitor::monitor_cache::MonitorCache;
use crate::routing::routing::SubscriberRouting;
use crate::routing::topic_router::TopicRouter;


/// Manages the subscriber connections that topics are received through, at most one per
///  routing. Which routing a topic type is received from is configured in the [TopicRouter].
pub struct SubscriberCache {
    router: Arc<TopicRouter>,
    dispatcher: Arc<TopicDispatcher>,
    factories: FactoryRegistry<dyn SubscriberFactory>,
    subscribers: Mutex<FxHashMap<SubscriberRouting, Arc<dyn SubscriberConnection>>>,
}

impl SubscriberCache {
    pub fn new(router: Arc<TopicRouter>, monitors: Arc<MonitorCache>, dispatcher: Arc<TopicDispatcher>) -> SubscriberCache {
        SubscriberCache {
            router,
            dispatcher,
            factories: FactoryRegistry::new("subscriber", monitors),
            subscribers: Default::default(),
        }
    }

    pub async fn add_factory(&self, factory: Arc<dyn SubscriberFactory>) -> Result<(), RouterError> {
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

    /// Creates the subscriber for a routing eagerly. Fails if there is a subscriber for that
    ///  routing already.
    pub async fn add_subscriber(&self, routing: &SubscriberRouting) -> Result<(), RouterError> {
        let mut subscribers = self.subscribers.lock().await;
        if subscribers.contains_key(routing) {
            return Err(RouterError::AddressAlreadyBound(routing.address.clone()));
        }
        let subscriber = self.create_subscriber(routing).await?;
        subscribers.insert(routing.clone(), subscriber);
        Ok(())
    }

    /// Starts receiving topics of type `T` through the subscriber for `T`'s routing, creating
    ///  the subscriber if necessary.
    pub async fn subscribe<T: Message>(&self) -> Result<(), RouterError> {
        let subscriber = self.subscriber_for::<T>().await?;
        subscriber.subscribe(&T::type_tag()).await?;
        debug!(type_tag = %T::type_tag(), "subscribed");
        Ok(())
    }

    pub async fn unsubscribe<T: Message>(&self) -> Result<(), RouterError> {
        let subscriber = self.subscriber_for::<T>().await?;
        subscriber.unsubscribe(&T::type_tag()).await?;
        debug!(type_tag = %T::type_tag(), "unsubscribed");
        Ok(())
    }

    async fn subscriber_for<T: Message>(&self) -> Result<Arc<dyn SubscriberConnection>, RouterError> {
        let routing = self.router.routing_for::<T>().await
            .ok_or_else(|| RouterError::RoutingNotFound(T::type_tag()))?;

        let mut subscribers = self.subscribers.lock().await;
        if let Some(subscriber) = subscribers.get(&routing) {
            return Ok(subscriber.clone());
        }
        let subscriber = self.create_subscriber(&routing).await?;
        subscribers.insert(routing, subscriber.clone());
        Ok(subscriber)
    }

    async fn create_subscriber(&self, routing: &SubscriberRouting) -> Result<Arc<dyn SubscriberConnection>, RouterError> {
        let factory = self.factories.get(routing.transport).await?;
        let handler = Arc::new(DispatchingTopicHandler {
            dispatcher: self.dispatcher.clone(),
        });
        let subscriber = factory.create_subscriber(&routing.address, handler).await?;
        debug!(%routing, "created subscriber");
        Ok(subscriber)
    }

    pub async fn routings(&self) -> Vec<SubscriberRouting> {
        self.subscribers.lock().await
            .keys()
            .cloned()
            .collect()
    }
}


struct DispatchingTopicHandler {
    dispatcher: Arc<TopicDispatcher>,
}

impl TopicHandler for DispatchingTopicHandler {
    fn on_topic(&self, source: &Address, topic: Package) {
        trace!(?source, ?topic, "received topic");
        let dispatcher = self.dispatcher.clone();
        let source = source.clone();
        tokio::spawn(async move {
            dispatcher.handle(&source, topic).await;
        });
    }
}
