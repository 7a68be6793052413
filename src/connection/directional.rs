use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::callbacks::{RequestTaskHandler, ResponseHandler, TopicHandler};
use crate::connection::connection::Connection;
use crate::messaging::address::{Address, TransportKind};
use crate::messaging::message::TypeTag;
use crate::messaging::package::Package;
use crate::monitor::monitor::Monitor;


/// Sends requests to the addresses it is connected to. Responses come back through the
///  [ResponseHandler] the connection was created with, in any order.
#[async_trait]
pub trait SenderConnection: Connection {
    async fn transmit(&self, request: Package) -> anyhow::Result<()>;
}

/// Receives requests on the addresses it is bound to, passing them to the [RequestTaskHandler]
///  it was created with. Responses go out through the [RequestTask](crate::dispatch::request_task::RequestTask).
pub trait ReceiverConnection: Connection {}

#[async_trait]
pub trait PublisherConnection: Connection {
    async fn publish(&self, topic: Package) -> anyhow::Result<()>;
}

/// Receives topics from the publishers at its addresses. Only topics it is subscribed to are
///  passed to its [TopicHandler].
#[async_trait]
pub trait SubscriberConnection: Connection {
    async fn subscribe(&self, topic: &TypeTag) -> anyhow::Result<()>;
    async fn unsubscribe(&self, topic: &TypeTag) -> anyhow::Result<()>;
}


/// A factory creates connections of one transport kind, connected to a given address. It also
///  provides the [Monitor] that controls these connections' lifecycle: the factory hands every
///  connection it creates to this monitor, and connections are initialized when the monitor is
///  started.
#[async_trait]
pub trait SenderFactory: Send + Sync + 'static {
    fn transport(&self) -> TransportKind;
    fn monitor(&self) -> Arc<dyn Monitor>;

    async fn create_sender(&self, address: &Address, responses: Arc<dyn ResponseHandler>) -> anyhow::Result<Arc<dyn SenderConnection>>;
}

#[async_trait]
pub trait ReceiverFactory: Send + Sync + 'static {
    fn transport(&self) -> TransportKind;
    fn monitor(&self) -> Arc<dyn Monitor>;

    async fn create_receiver(&self, address: &Address, requests: Arc<dyn RequestTaskHandler>) -> anyhow::Result<Arc<dyn ReceiverConnection>>;
}

#[async_trait]
pub trait PublisherFactory: Send + Sync + 'static {
    fn transport(&self) -> TransportKind;
    fn monitor(&self) -> Arc<dyn Monitor>;

    async fn create_publisher(&self, address: &Address) -> anyhow::Result<Arc<dyn PublisherConnection>>;
}

#[async_trait]
pub trait SubscriberFactory: Send + Sync + 'static {
    fn transport(&self) -> TransportKind;
    fn monitor(&self) -> Arc<dyn Monitor>;

    async fn create_subscriber(&self, address: &Address, topics: Arc<dyn TopicHandler>) -> anyhow::Result<Arc<dyn SubscriberConnection>>;
}
