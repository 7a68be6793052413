use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::connection::callbacks::{RequestTaskHandler, ResponseHandler, TopicHandler};
use crate::connection::directional::{PublisherConnection, PublisherFactory, ReceiverConnection, ReceiverFactory, SenderConnection, SenderFactory, SubscriberConnection, SubscriberFactory};
use crate::connection::transport::Transport;
use crate::messaging::address::{Address, TransportKind};
use crate::monitor::monitor::{MockMonitor, Monitor};
use crate::test_util::loopback::{LoopbackFactory, LoopbackHub, LoopbackTransport};


pub fn working_monitor() -> Arc<dyn Monitor> {
    let mut monitor = MockMonitor::new();
    monitor.expect_start_monitoring()
        .returning(|| Ok(()));
    monitor.expect_stop_monitoring()
        .returning(|| Ok(()));
    Arc::new(monitor)
}

pub fn failing_monitor() -> Arc<dyn Monitor> {
    let mut monitor = MockMonitor::new();
    monitor.expect_start_monitoring()
        .returning(|| Err(anyhow!("cannot start")));
    monitor.expect_stop_monitoring()
        .returning(|| Ok(()));
    Arc::new(monitor)
}


/// Creates loopback connections, but under an arbitrary transport kind and with an arbitrary
///  monitor. Sender creation for one address can be held at a gate until the test releases it.
pub struct StubFactory {
    kind: TransportKind,
    inner: Arc<LoopbackFactory>,
    monitor: Arc<dyn Monitor>,
    gate: Option<(Address, Arc<Semaphore>)>,
    num_senders_created: AtomicUsize,
}

impl StubFactory {
    pub fn new(kind: TransportKind, hub: Arc<LoopbackHub>, monitor: Arc<dyn Monitor>) -> StubFactory {
        StubFactory {
            kind,
            inner: LoopbackTransport::new(hub).factory(),
            monitor,
            gate: None,
            num_senders_created: AtomicUsize::new(0),
        }
    }

    /// Senders for `address` are only created after [Semaphore::add_permits] is called on the
    ///  returned gate, one per permit.
    pub fn gated(mut self, address: Address) -> (StubFactory, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some((address, gate.clone()));
        (self, gate)
    }

    pub fn num_senders_created(&self) -> usize {
        self.num_senders_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SenderFactory for StubFactory {
    fn transport(&self) -> TransportKind {
        self.kind
    }

    fn monitor(&self) -> Arc<dyn Monitor> {
        self.monitor.clone()
    }

    async fn create_sender(&self, address: &Address, responses: Arc<dyn ResponseHandler>) -> anyhow::Result<Arc<dyn SenderConnection>> {
        if let Some((gated, gate)) = &self.gate {
            if gated == address {
                gate.acquire().await?.forget();
            }
        }
        self.num_senders_created.fetch_add(1, Ordering::SeqCst);
        self.inner.create_sender(address, responses).await
    }
}

#[async_trait]
impl ReceiverFactory for StubFactory {
    fn transport(&self) -> TransportKind {
        self.kind
    }

    fn monitor(&self) -> Arc<dyn Monitor> {
        self.monitor.clone()
    }

    async fn create_receiver(&self, address: &Address, requests: Arc<dyn RequestTaskHandler>) -> anyhow::Result<Arc<dyn ReceiverConnection>> {
        self.inner.create_receiver(address, requests).await
    }
}

#[async_trait]
impl PublisherFactory for StubFactory {
    fn transport(&self) -> TransportKind {
        self.kind
    }

    fn monitor(&self) -> Arc<dyn Monitor> {
        self.monitor.clone()
    }

    async fn create_publisher(&self, address: &Address) -> anyhow::Result<Arc<dyn PublisherConnection>> {
        self.inner.create_publisher(address).await
    }
}

#[async_trait]
impl SubscriberFactory for StubFactory {
    fn transport(&self) -> TransportKind {
        self.kind
    }

    fn monitor(&self) -> Arc<dyn Monitor> {
        self.monitor.clone()
    }

    async fn create_subscriber(&self, address: &Address, topics: Arc<dyn TopicHandler>) -> anyhow::Result<Arc<dyn SubscriberConnection>> {
        self.inner.create_subscriber(address, topics).await
    }
}


/// A transport with a separately configurable factory per direction, `None` meaning the
///  direction is not supported.
pub struct StubTransport {
    pub kind: TransportKind,
    pub sender: Option<Arc<StubFactory>>,
    pub receiver: Option<Arc<StubFactory>>,
    pub publisher: Option<Arc<StubFactory>>,
    pub subscriber: Option<Arc<StubFactory>>,
}

impl StubTransport {
    pub fn new(kind: TransportKind) -> StubTransport {
        StubTransport {
            kind,
            sender: None,
            receiver: None,
            publisher: None,
            subscriber: None,
        }
    }

    /// all four directions, served by the same factory
    pub fn full(factory: Arc<StubFactory>) -> StubTransport {
        StubTransport {
            kind: factory.kind,
            sender: Some(factory.clone()),
            receiver: Some(factory.clone()),
            publisher: Some(factory.clone()),
            subscriber: Some(factory),
        }
    }
}

impl Transport for StubTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn sender_factory(&self) -> Option<Arc<dyn SenderFactory>> {
        self.sender.clone()
            .map(|f| f as Arc<dyn SenderFactory>)
    }

    fn receiver_factory(&self) -> Option<Arc<dyn ReceiverFactory>> {
        self.receiver.clone()
            .map(|f| f as Arc<dyn ReceiverFactory>)
    }

    fn publisher_factory(&self) -> Option<Arc<dyn PublisherFactory>> {
        self.publisher.clone()
            .map(|f| f as Arc<dyn PublisherFactory>)
    }

    fn subscriber_factory(&self) -> Option<Arc<dyn SubscriberFactory>> {
        self.subscriber.clone()
            .map(|f| f as Arc<dyn SubscriberFactory>)
    }
}
