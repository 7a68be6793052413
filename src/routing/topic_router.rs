use crate::error::RouterError;
use crate::messaging::message::Message;
use crate::routing::routing::{RoutingTable, SubscriberRouting};


/// Maps topic types to the [SubscriberRouting] they are received from.
#[derive(Debug, Default)]
pub struct TopicRouter {
    table: RoutingTable,
}

impl TopicRouter {
    pub fn new() -> TopicRouter {
        Default::default()
    }

    /// Fails if there is a routing for `T` already, leaving that routing in place.
    pub async fn add_topic_mapping<T: Message>(&self, routing: SubscriberRouting) -> Result<(), RouterError> {
        self.table.add(T::type_tag(), routing).await
    }

    pub async fn routing_for<T: Message>(&self) -> Option<SubscriberRouting> {
        self.table.get(&T::type_tag()).await
    }
}
