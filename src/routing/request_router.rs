use crate::error::RouterError;
use crate::messaging::message::Message;
use crate::routing::routing::{RoutingTable, SenderRouting};


/// Maps request types to the [SenderRouting] their requests are sent through.
#[derive(Debug, Default)]
pub struct RequestRouter {
    table: RoutingTable,
}

impl RequestRouter {
    pub fn new() -> RequestRouter {
        Default::default()
    }

    /// Fails if there is a routing for `T` already, leaving that routing in place.
    pub async fn add_request_mapping<T: Message>(&self, routing: SenderRouting) -> Result<(), RouterError> {
        self.table.add(T::type_tag(), routing).await
    }

    pub async fn routing_for<T: Message>(&self) -> Option<SenderRouting> {
        self.table.get(&T::type_tag()).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::address::{Address, TransportKind};
    use crate::messaging::message::TypeTag;
    use crate::test_util::message::{TestRequest, TestResponse};

    const TCP: TransportKind = TransportKind::new("tcp");

    #[tokio::test]
    async fn test_routing_not_found() {
        let router = RequestRouter::new();
        assert_eq!(router.routing_for::<TestRequest>().await, None);
    }

    #[tokio::test]
    async fn test_second_mapping_fails_and_keeps_the_first() {
        let router = RequestRouter::new();
        let original = SenderRouting::new(TCP, Address::tcp("localhost", 1));
        let other = SenderRouting::new(TCP, Address::tcp("localhost", 2));

        router.add_request_mapping::<TestRequest>(original.clone()).await.unwrap();
        match router.add_request_mapping::<TestRequest>(other.clone()).await {
            Err(RouterError::RoutingAlreadyRegistered { type_tag, existing, attempted }) => {
                assert_eq!(type_tag, TypeTag::of::<TestRequest>());
                assert_eq!(existing, original);
                assert_eq!(attempted, other);
            }
            other => panic!("expected duplicate routing error, was {:?}", other),
        }

        assert_eq!(router.routing_for::<TestRequest>().await, Some(original));
    }

    #[tokio::test]
    async fn test_mappings_are_per_type() {
        let router = RequestRouter::new();
        let routing = SenderRouting::new(TCP, Address::tcp("localhost", 1));
        router.add_request_mapping::<TestRequest>(routing.clone()).await.unwrap();
        router.add_request_mapping::<TestResponse>(routing.clone()).await.unwrap();
        assert_eq!(router.routing_for::<TestResponse>().await, Some(routing));
    }
}
