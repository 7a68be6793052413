use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::connection::callbacks::{RequestTaskHandler, ResponseHandler, TopicHandler};
use crate::connection::connection::{Connection, ConnectionState};
use crate::connection::directional::{PublisherConnection, PublisherFactory, ReceiverConnection, ReceiverFactory, SenderConnection, SenderFactory, SubscriberConnection, SubscriberFactory};
use crate::connection::transport::Transport;
use crate::dispatch::request_task::RequestTask;
use crate::messaging::address::{Address, TransportKind};
use crate::messaging::message::TypeTag;
use crate::messaging::package::Package;
use crate::monitor::connection_monitor::ConnectionMonitor;
use crate::monitor::monitor::Monitor;


pub const LOOPBACK: TransportKind = TransportKind::new("loopback");

pub fn loopback_address(name: &str) -> Address {
    Address::inproc(name)
}

fn encode(package: &Package) -> Bytes {
    let mut buf = BytesMut::new();
    package.ser(&mut buf);
    buf.freeze()
}

fn decode(mut buf: Bytes) -> anyhow::Result<Package> {
    Package::try_deser(&mut buf)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock()
        .unwrap_or_else(PoisonError::into_inner)
}


struct Delivery {
    payload: Bytes,
    reply_to: mpsc::UnboundedSender<Bytes>,
}

type TopicChannel = mpsc::UnboundedSender<(Address, Bytes)>;

/// The in-process 'network' that loopback connections exchange encoded packages through.
///
/// Addresses can be broken deliberately to simulate failure: sending or publishing to a broken
///  address fails.
#[derive(Default)]
pub struct LoopbackHub {
    inner: Mutex<HubInner>,
}

#[derive(Default)]
struct HubInner {
    receivers: FxHashMap<Address, mpsc::UnboundedSender<Delivery>>,
    publishers: FxHashSet<Address>,
    subscribers: FxHashMap<Address, Vec<(u64, TopicChannel)>>,
    next_subscriber_id: u64,
    broken: FxHashSet<Address>,
    publish_attempts: FxHashMap<Address, usize>,
}

impl Debug for LoopbackHub {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        write!(f, "LoopbackHub{{receivers:{:?}, publishers:{:?}}}", inner.receivers.keys(), inner.publishers)
    }
}

impl LoopbackHub {
    pub fn new() -> Arc<LoopbackHub> {
        Default::default()
    }

    pub fn break_address(&self, address: &Address) {
        lock(&self.inner).broken.insert(address.clone());
    }

    pub fn repair_address(&self, address: &Address) {
        lock(&self.inner).broken.remove(address);
    }

    /// the number of times something was published at an address, including failed attempts
    pub fn publish_attempts(&self, address: &Address) -> usize {
        lock(&self.inner).publish_attempts
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    pub fn is_bound(&self, address: &Address) -> bool {
        let inner = lock(&self.inner);
        inner.receivers.contains_key(address) || inner.publishers.contains(address)
    }

    fn bind_receiver(&self, address: &Address, channel: mpsc::UnboundedSender<Delivery>) -> anyhow::Result<()> {
        let mut inner = lock(&self.inner);
        if inner.receivers.contains_key(address) {
            bail!("address {} is in use", address);
        }
        inner.receivers.insert(address.clone(), channel);
        Ok(())
    }

    fn unbind_receiver(&self, address: &Address) {
        lock(&self.inner).receivers.remove(address);
    }

    fn deliver(&self, to: &Address, delivery: Delivery) -> anyhow::Result<()> {
        let inner = lock(&self.inner);
        if inner.broken.contains(to) {
            bail!("address {} is broken", to);
        }
        let receiver = inner.receivers.get(to)
            .ok_or_else(|| anyhow!("no receiver bound at {}", to))?;
        receiver.send(delivery)
            .map_err(|_| anyhow!("receiver at {} is closed", to))
    }

    fn bind_publisher(&self, address: &Address) -> anyhow::Result<()> {
        if !lock(&self.inner).publishers.insert(address.clone()) {
            bail!("address {} is in use", address);
        }
        Ok(())
    }

    fn unbind_publisher(&self, address: &Address) {
        lock(&self.inner).publishers.remove(address);
    }

    fn publish(&self, from: &Address, payload: Bytes) -> anyhow::Result<()> {
        let mut inner = lock(&self.inner);
        *inner.publish_attempts.entry(from.clone()).or_default() += 1;
        if inner.broken.contains(from) {
            bail!("address {} is broken", from);
        }
        if !inner.publishers.contains(from) {
            bail!("no publisher bound at {}", from);
        }

        if let Some(subscribers) = inner.subscribers.get_mut(from) {
            subscribers.retain(|(_, channel)| channel.send((from.clone(), payload.clone())).is_ok());
        }
        Ok(())
    }

    fn add_subscriber(&self, address: &Address, id: u64, channel: TopicChannel) {
        lock(&self.inner).subscribers
            .entry(address.clone())
            .or_default()
            .push((id, channel));
    }

    fn remove_subscriber(&self, address: &Address, id: u64) {
        if let Some(subscribers) = lock(&self.inner).subscribers.get_mut(address) {
            subscribers.retain(|(s, _)| *s != id);
        }
    }

    fn new_subscriber_id(&self) -> u64 {
        let mut inner = lock(&self.inner);
        inner.next_subscriber_id += 1;
        inner.next_subscriber_id
    }
}


/// Sends requests to the receiver bound at its (first) address. Responses come back through a
///  per-sender channel that is polled by a separate task.
pub struct LoopbackSender {
    state: ConnectionState,
    hub: Arc<LoopbackHub>,
    reply_channel: mpsc::UnboundedSender<Bytes>,
    reply_poller: JoinHandle<()>,
}

impl Debug for LoopbackSender {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoopbackSender")
    }
}

impl Drop for LoopbackSender {
    fn drop(&mut self) {
        self.reply_poller.abort();
    }
}

impl LoopbackSender {
    fn new(hub: Arc<LoopbackHub>, responses: Arc<dyn ResponseHandler>) -> LoopbackSender {
        let (reply_channel, mut replies) = mpsc::unbounded_channel::<Bytes>();
        let reply_poller = tokio::spawn(async move {
            while let Some(buf) = replies.recv().await {
                match decode(buf) {
                    Ok(response) => responses.on_response(response),
                    Err(e) => warn!(error = %e, "received an invalid response - discarding"),
                }
            }
        });

        LoopbackSender {
            state: Default::default(),
            hub,
            reply_channel,
            reply_poller,
        }
    }
}

#[async_trait]
impl Connection for LoopbackSender {
    fn state(&self) -> &ConnectionState {
        &self.state
    }

    async fn socket_add(&self, address: &Address) -> anyhow::Result<()> {
        trace!(?address, "connecting loopback sender");
        Ok(())
    }

    async fn socket_remove(&self, address: &Address) -> anyhow::Result<()> {
        trace!(?address, "disconnecting loopback sender");
        Ok(())
    }
}

#[async_trait]
impl SenderConnection for LoopbackSender {
    async fn transmit(&self, request: Package) -> anyhow::Result<()> {
        if !self.is_connected().await {
            bail!("loopback sender is not connected");
        }
        let to = self.addresses().await
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("loopback sender has no address"))?;

        self.hub.deliver(&to, Delivery {
            payload: encode(&request),
            reply_to: self.reply_channel.clone(),
        })
    }
}


/// Receives requests at its addresses. There is a polling task per bound address, and it hands
///  each request to the [RequestTaskHandler] together with a responder that sends the response
///  back to the requesting sender.
pub struct LoopbackReceiver {
    state: ConnectionState,
    hub: Arc<LoopbackHub>,
    requests: Arc<dyn RequestTaskHandler>,
    pollers: Mutex<FxHashMap<Address, JoinHandle<()>>>,
}

impl Debug for LoopbackReceiver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoopbackReceiver")
    }
}

impl Drop for LoopbackReceiver {
    fn drop(&mut self) {
        for (address, poller) in lock(&self.pollers).drain() {
            self.hub.unbind_receiver(&address);
            poller.abort();
        }
    }
}

impl LoopbackReceiver {
    async fn poll(address: Address, mut deliveries: mpsc::UnboundedReceiver<Delivery>, requests: Arc<dyn RequestTaskHandler>) {
        while let Some(delivery) = deliveries.recv().await {
            let request = match decode(delivery.payload) {
                Ok(request) => request,
                Err(e) => {
                    warn!(?address, error = %e, "received an invalid package - discarding");
                    continue;
                }
            };

            let reply_to = delivery.reply_to;
            let responder = move |response: Package| {
                if reply_to.send(encode(&response)).is_err() {
                    debug!("requesting sender went away - discarding response");
                }
            };
            match RequestTask::new(request, address.clone(), responder) {
                Ok(task) => requests.on_request(task),
                Err(e) => warn!(?address, error = %e, "discarding package"),
            }
        }
    }
}

#[async_trait]
impl Connection for LoopbackReceiver {
    fn state(&self) -> &ConnectionState {
        &self.state
    }

    async fn socket_add(&self, address: &Address) -> anyhow::Result<()> {
        let (channel, deliveries) = mpsc::unbounded_channel();
        self.hub.bind_receiver(address, channel)?;

        let poller = tokio::spawn(Self::poll(address.clone(), deliveries, self.requests.clone()));
        lock(&self.pollers).insert(address.clone(), poller);
        debug!(?address, "bound loopback receiver");
        Ok(())
    }

    async fn socket_remove(&self, address: &Address) -> anyhow::Result<()> {
        self.hub.unbind_receiver(address);
        if let Some(poller) = lock(&self.pollers).remove(address) {
            poller.abort();
        }
        debug!(?address, "unbound loopback receiver");
        Ok(())
    }
}

impl ReceiverConnection for LoopbackReceiver {}


pub struct LoopbackPublisher {
    state: ConnectionState,
    hub: Arc<LoopbackHub>,
}

impl Debug for LoopbackPublisher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoopbackPublisher")
    }
}

#[async_trait]
impl Connection for LoopbackPublisher {
    fn state(&self) -> &ConnectionState {
        &self.state
    }

    async fn socket_add(&self, address: &Address) -> anyhow::Result<()> {
        self.hub.bind_publisher(address)
    }

    async fn socket_remove(&self, address: &Address) -> anyhow::Result<()> {
        self.hub.unbind_publisher(address);
        Ok(())
    }
}

#[async_trait]
impl PublisherConnection for LoopbackPublisher {
    async fn publish(&self, topic: Package) -> anyhow::Result<()> {
        if !self.is_connected().await {
            bail!("loopback publisher is not connected");
        }
        let payload = encode(&topic);
        for address in self.addresses().await {
            self.hub.publish(&address, payload.clone())?;
        }
        Ok(())
    }
}


/// Receives topics from the publishers at its addresses, passing on the ones it is subscribed to.
pub struct LoopbackSubscriber {
    state: ConnectionState,
    hub: Arc<LoopbackHub>,
    id: u64,
    channel: TopicChannel,
    subscriptions: Arc<Mutex<FxHashSet<TypeTag>>>,
    poller: JoinHandle<()>,
}

impl Debug for LoopbackSubscriber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoopbackSubscriber{{id:{}}}", self.id)
    }
}

impl Drop for LoopbackSubscriber {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

impl LoopbackSubscriber {
    fn new(hub: Arc<LoopbackHub>, topics: Arc<dyn TopicHandler>) -> LoopbackSubscriber {
        let (channel, mut received) = mpsc::unbounded_channel::<(Address, Bytes)>();
        let subscriptions: Arc<Mutex<FxHashSet<TypeTag>>> = Default::default();

        let poller_subscriptions = subscriptions.clone();
        let poller = tokio::spawn(async move {
            while let Some((source, buf)) = received.recv().await {
                let topic = match decode(buf) {
                    Ok(topic) => topic,
                    Err(e) => {
                        warn!(?source, error = %e, "received an invalid topic - discarding");
                        continue;
                    }
                };
                let is_subscribed = match &topic {
                    Package::Topic { type_tag, .. } => lock(&poller_subscriptions).contains(type_tag),
                    _ => false,
                };
                if is_subscribed {
                    topics.on_topic(&source, topic);
                }
                else {
                    trace!(?source, "not subscribed - discarding");
                }
            }
        });

        LoopbackSubscriber {
            state: Default::default(),
            id: hub.new_subscriber_id(),
            hub,
            channel,
            subscriptions,
            poller,
        }
    }
}

#[async_trait]
impl Connection for LoopbackSubscriber {
    fn state(&self) -> &ConnectionState {
        &self.state
    }

    async fn socket_add(&self, address: &Address) -> anyhow::Result<()> {
        self.hub.add_subscriber(address, self.id, self.channel.clone());
        Ok(())
    }

    async fn socket_remove(&self, address: &Address) -> anyhow::Result<()> {
        self.hub.remove_subscriber(address, self.id);
        Ok(())
    }
}

#[async_trait]
impl SubscriberConnection for LoopbackSubscriber {
    async fn subscribe(&self, topic: &TypeTag) -> anyhow::Result<()> {
        lock(&self.subscriptions).insert(topic.clone());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &TypeTag) -> anyhow::Result<()> {
        lock(&self.subscriptions).remove(topic);
        Ok(())
    }
}


/// Creates loopback connections of all four kinds. Each connection is connected to the address
///  it is created for, and it is tracked by the factory's [ConnectionMonitor].
pub struct LoopbackFactory {
    hub: Arc<LoopbackHub>,
    monitor: Arc<ConnectionMonitor>,
}

impl LoopbackFactory {
    async fn track<C: Connection>(&self, connection: Arc<C>, address: &Address) -> anyhow::Result<Arc<C>> {
        connection.add_address(address.clone()).await?;
        self.monitor.track(connection.clone()).await;
        Ok(connection)
    }
}

#[async_trait]
impl SenderFactory for LoopbackFactory {
    fn transport(&self) -> TransportKind {
        LOOPBACK
    }

    fn monitor(&self) -> Arc<dyn Monitor> {
        self.monitor.clone()
    }

    async fn create_sender(&self, address: &Address, responses: Arc<dyn ResponseHandler>) -> anyhow::Result<Arc<dyn SenderConnection>> {
        let sender = Arc::new(LoopbackSender::new(self.hub.clone(), responses));
        Ok(self.track(sender, address).await?)
    }
}

#[async_trait]
impl ReceiverFactory for LoopbackFactory {
    fn transport(&self) -> TransportKind {
        LOOPBACK
    }

    fn monitor(&self) -> Arc<dyn Monitor> {
        self.monitor.clone()
    }

    async fn create_receiver(&self, address: &Address, requests: Arc<dyn RequestTaskHandler>) -> anyhow::Result<Arc<dyn ReceiverConnection>> {
        let receiver = Arc::new(LoopbackReceiver {
            state: Default::default(),
            hub: self.hub.clone(),
            requests,
            pollers: Default::default(),
        });
        Ok(self.track(receiver, address).await?)
    }
}

#[async_trait]
impl PublisherFactory for LoopbackFactory {
    fn transport(&self) -> TransportKind {
        LOOPBACK
    }

    fn monitor(&self) -> Arc<dyn Monitor> {
        self.monitor.clone()
    }

    async fn create_publisher(&self, address: &Address) -> anyhow::Result<Arc<dyn PublisherConnection>> {
        let publisher = Arc::new(LoopbackPublisher {
            state: Default::default(),
            hub: self.hub.clone(),
        });
        Ok(self.track(publisher, address).await?)
    }
}

#[async_trait]
impl SubscriberFactory for LoopbackFactory {
    fn transport(&self) -> TransportKind {
        LOOPBACK
    }

    fn monitor(&self) -> Arc<dyn Monitor> {
        self.monitor.clone()
    }

    async fn create_subscriber(&self, address: &Address, topics: Arc<dyn TopicHandler>) -> anyhow::Result<Arc<dyn SubscriberConnection>> {
        let subscriber = Arc::new(LoopbackSubscriber::new(self.hub.clone(), topics));
        Ok(self.track(subscriber, address).await?)
    }
}


pub struct LoopbackTransport {
    factory: Arc<LoopbackFactory>,
}

impl LoopbackTransport {
    pub const LIVENESS_INTERVAL: Duration = Duration::from_millis(50);

    pub fn new(hub: Arc<LoopbackHub>) -> LoopbackTransport {
        LoopbackTransport {
            factory: Arc::new(LoopbackFactory {
                hub,
                monitor: Arc::new(ConnectionMonitor::new(LOOPBACK, Self::LIVENESS_INTERVAL)),
            }),
        }
    }

    pub fn factory(&self) -> Arc<LoopbackFactory> {
        self.factory.clone()
    }

    pub fn monitor(&self) -> Arc<ConnectionMonitor> {
        self.factory.monitor.clone()
    }
}

impl Transport for LoopbackTransport {
    fn kind(&self) -> TransportKind {
        LOOPBACK
    }

    fn sender_factory(&self) -> Option<Arc<dyn SenderFactory>> {
        Some(self.factory.clone())
    }

    fn receiver_factory(&self) -> Option<Arc<dyn ReceiverFactory>> {
        Some(self.factory.clone())
    }

    fn publisher_factory(&self) -> Option<Arc<dyn PublisherFactory>> {
        Some(self.factory.clone())
    }

    fn subscriber_factory(&self) -> Option<Arc<dyn SubscriberFactory>> {
        Some(self.factory.clone())
    }
}
