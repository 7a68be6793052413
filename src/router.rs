use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::publisher_cache::PublisherCache;
use crate::cache::receiver_cache::ReceiverCache;
use crate::cache::sender_cache::SenderCache;
use crate::cache::subscriber_cache::SubscriberCache;
use crate::config::RouterConfig;
use crate::connection::transport::Transport;
use crate::dispatch::request_dispatcher::{RequestDispatcher, RequestHandler};
use crate::dispatch::topic_dispatcher::TopicDispatcher;
use crate::error::RouterError;
use crate::messaging::address::{Address, TransportKind};
use crate::messaging::message::Message;
use crate::messaging::package::PackageFactory;
use crate::monitor::monitor::Monitor;
use crate::monitor::monitor_cache::MonitorCache;
use crate::routing::request_router::RequestRouter;
use crate::routing::routing::{SenderRouting, SubscriberRouting};
use crate::routing::topic_router::TopicRouter;


#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RouterInfo {
    pub name: String,
    pub running: bool,
    pub started_at: Option<SystemTime>,
}

/// The application's entry point for messaging. A [Router] owns the routing tables, the handler
///  registries and the connection caches, and it shares a single [MonitorCache] between the
///  caches so that all background activity is started and stopped together.
///
/// Configuration (transports, routings, handlers, bound addresses) is expected to happen before
///  [Router::start], though adding things later works: connections created while the router is
///  running are initialized right away.
pub struct Router {
    config: RouterConfig,
    monitors: Arc<MonitorCache>,
    request_router: Arc<RequestRouter>,
    topic_router: Arc<TopicRouter>,
    request_dispatcher: Arc<RequestDispatcher>,
    topic_dispatcher: Arc<TopicDispatcher>,
    senders: SenderCache,
    receivers: ReceiverCache,
    publishers: PublisherCache,
    subscribers: SubscriberCache,
    started_at: Mutex<Option<SystemTime>>,
}

impl Router {
    pub fn new(config: RouterConfig) -> anyhow::Result<Router> {
        config.validate()?;

        let package_factory = PackageFactory::new(config.serializer, config.max_message_size);
        let monitors = Arc::new(MonitorCache::new());
        let request_router = Arc::new(RequestRouter::new());
        let topic_router = Arc::new(TopicRouter::new());
        let request_dispatcher = Arc::new(RequestDispatcher::new(package_factory));
        let topic_dispatcher = Arc::new(TopicDispatcher::new(package_factory, config.duplicate_topic_handlers));

        Ok(Router {
            senders: SenderCache::new(request_router.clone(), monitors.clone(), package_factory, config.default_send_timeout),
            receivers: ReceiverCache::new(monitors.clone(), request_dispatcher.clone()),
            publishers: PublisherCache::new(monitors.clone(), package_factory),
            subscribers: SubscriberCache::new(topic_router.clone(), monitors.clone(), topic_dispatcher.clone()),
            config,
            monitors,
            request_router,
            topic_router,
            request_dispatcher,
            topic_dispatcher,
            started_at: Default::default(),
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn monitors(&self) -> &Arc<MonitorCache> {
        &self.monitors
    }

    /// Registers all factories a transport provides with the corresponding caches. This is all
    ///  or nothing: if any of the factories cannot be registered, the ones registered so far are
    ///  removed again, together with monitors that were newly registered for them.
    pub async fn add_transport(&self, transport: &dyn Transport) -> Result<(), RouterError> {
        let kind = transport.kind();
        let sender = transport.sender_factory();
        let receiver = transport.receiver_factory();
        let publisher = transport.publisher_factory();
        let subscriber = transport.subscriber_factory();

        let is_registered =
            (sender.is_some() && self.senders.has_factory(kind).await) ||
            (receiver.is_some() && self.receivers.has_factory(kind).await) ||
            (publisher.is_some() && self.publishers.has_factory(kind).await) ||
            (subscriber.is_some() && self.subscribers.has_factory(kind).await);
        if is_registered {
            return Err(RouterError::FactoryAlreadyRegistered(kind));
        }

        let mut new_monitors: Vec<Arc<dyn Monitor>> = Vec::new();
        let candidates = [
            sender.as_ref().map(|f| f.monitor()),
            receiver.as_ref().map(|f| f.monitor()),
            publisher.as_ref().map(|f| f.monitor()),
            subscriber.as_ref().map(|f| f.monitor()),
        ];
        for monitor in candidates.into_iter().flatten() {
            if !self.monitors.contains(&monitor).await && !new_monitors.iter().any(|m| Arc::ptr_eq(m, &monitor)) {
                new_monitors.push(monitor);
            }
        }

        let (mut sender_added, mut receiver_added, mut publisher_added, mut subscriber_added) = (false, false, false, false);
        let result = async {
            if let Some(factory) = sender {
                self.senders.add_factory(factory).await?;
                sender_added = true;
            }
            if let Some(factory) = receiver {
                self.receivers.add_factory(factory).await?;
                receiver_added = true;
            }
            if let Some(factory) = publisher {
                self.publishers.add_factory(factory).await?;
                publisher_added = true;
            }
            if let Some(factory) = subscriber {
                self.subscribers.add_factory(factory).await?;
                subscriber_added = true;
            }
            Ok::<_, RouterError>(())
        }.await;

        if let Err(e) = result {
            warn!(transport = %kind, error = %e, "failed to add transport - rolling back");
            if sender_added {
                self.senders.remove_factory(kind).await;
            }
            if receiver_added {
                self.receivers.remove_factory(kind).await;
            }
            if publisher_added {
                self.publishers.remove_factory(kind).await;
            }
            if subscriber_added {
                self.subscribers.remove_factory(kind).await;
            }
            for monitor in &new_monitors {
                self.monitors.remove_monitor(monitor).await;
            }
            return Err(e);
        }

        debug!(transport = %kind, "added transport");
        Ok(())
    }

    pub async fn add_request_mapping<T: Message>(&self, transport: TransportKind, address: Address) -> Result<(), RouterError> {
        self.request_router.add_request_mapping::<T>(SenderRouting::new(transport, address)).await
    }

    pub async fn add_topic_mapping<T: Message>(&self, transport: TransportKind, address: Address) -> Result<(), RouterError> {
        self.topic_router.add_topic_mapping::<T>(SubscriberRouting::new(transport, address)).await
    }

    pub async fn add_sender(&self, transport: TransportKind, address: Address) -> Result<(), RouterError> {
        self.senders.add_sender(&SenderRouting::new(transport, address)).await
    }

    pub async fn add_receiver(&self, transport: TransportKind, address: Address) -> Result<(), RouterError> {
        self.receivers.add_receiver(transport, address).await
    }

    pub async fn add_publisher(&self, transport: TransportKind, address: Address) -> Result<(), RouterError> {
        self.publishers.add_publisher(transport, address).await
    }

    pub async fn add_subscriber(&self, transport: TransportKind, address: Address) -> Result<(), RouterError> {
        self.subscribers.add_subscriber(&SubscriberRouting::new(transport, address)).await
    }

    pub async fn register<Req, Resp, F>(&self, handler: F) -> Result<(), RouterError>
    where
        Req: Message,
        Resp: Message,
        F: Fn(Req) -> anyhow::Result<Resp> + Send + Sync + 'static,
    {
        self.request_dispatcher.register(handler).await
    }

    pub async fn register_async<Req, Resp, F, Fut>(&self, handler: F) -> Result<(), RouterError>
    where
        Req: Message,
        Resp: Message,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        self.request_dispatcher.register_async(handler).await
    }

    pub async fn register_handler<Req: Message, Resp: Message>(&self, handler: Arc<dyn RequestHandler<Req, Resp>>) -> Result<(), RouterError> {
        self.request_dispatcher.register_handler(handler).await
    }

    /// see [TopicDispatcher::register]
    pub async fn register_topic<T, F>(&self, handler: F) -> bool
    where
        T: Message,
        F: Fn(&Address, T) + Send + Sync + 'static,
    {
        self.topic_dispatcher.register(handler).await
    }

    pub async fn register_topic_async<T, F, Fut>(&self, handler: F) -> bool
    where
        T: Message,
        F: Fn(Address, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.topic_dispatcher.register_async(handler).await
    }

    /// Starts all background activity, initializing connections. Fails if the router is
    ///  running already.
    pub async fn start(&self) -> Result<(), RouterError> {
        let mut started_at = self.started_at.lock().await;
        if started_at.is_some() {
            return Err(RouterError::AlreadyRunning);
        }

        self.monitors.start_all_monitors().await?;
        *started_at = Some(SystemTime::now());
        info!(name = %self.config.name, "router started");
        Ok(())
    }

    /// Stops all background activity, terminating connections. Fails if the router is not
    ///  running.
    pub async fn stop(&self) -> Result<(), RouterError> {
        let mut started_at = self.started_at.lock().await;
        if started_at.is_none() {
            return Err(RouterError::NotRunning);
        }

        self.monitors.stop_all_monitors().await;
        *started_at = None;
        info!(name = %self.config.name, "router stopped");
        Ok(())
    }

    pub async fn info(&self) -> RouterInfo {
        let started_at = *self.started_at.lock().await;
        RouterInfo {
            name: self.config.name.clone(),
            running: started_at.is_some(),
            started_at,
        }
    }

    pub async fn send<Req: Message, Resp: Message>(&self, request: &Req) -> Result<Resp, RouterError> {
        self.senders.send(request).await
    }

    pub async fn send_with_timeout<Req: Message, Resp: Message>(&self, request: &Req, timeout: Duration) -> Result<Resp, RouterError> {
        self.senders.send_with_timeout(request, timeout).await
    }

    /// Sends a topic through all publishers, returning the number of publishers that sent it.
    pub async fn publish<T: Message>(&self, topic: &T) -> Result<usize, RouterError> {
        self.publishers.publish(topic).await
    }

    pub async fn subscribe<T: Message>(&self) -> Result<(), RouterError> {
        self.subscribers.subscribe::<T>().await
    }

    pub async fn unsubscribe<T: Message>(&self) -> Result<(), RouterError> {
        self.subscribers.unsubscribe::<T>().await
    }
}
