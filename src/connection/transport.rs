use std::sync::Arc;

use crate::connection::directional::{PublisherFactory, ReceiverFactory, SenderFactory, SubscriberFactory};
use crate::messaging::address::TransportKind;


/// A [Transport] bundles the factories of one transport implementation. A transport does not
///  need to support all four directions; it returns `None` for the ones it does not.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn sender_factory(&self) -> Option<Arc<dyn SenderFactory>> {
        None
    }
    fn receiver_factory(&self) -> Option<Arc<dyn ReceiverFactory>> {
        None
    }
    fn publisher_factory(&self) -> Option<Arc<dyn PublisherFactory>> {
        None
    }
    fn subscriber_factory(&self) -> Option<Arc<dyn SubscriberFactory>> {
        None
    }
}
