use std::collections::hash_map::Entry;
use std::fmt::{Debug, Display, Formatter};

use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::RouterError;
use crate::messaging::address::{Address, TransportKind};
use crate::messaging::message::TypeTag;


/// A [Routing] binds a message type to a transport and an address. It is also the key for
///  caching connections, so the same address with different transports means different
///  connections.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Routing {
    pub transport: TransportKind,
    pub address: Address,
}

/// where requests of a given type are sent
pub type SenderRouting = Routing;
/// where topics of a given type are received from
pub type SubscriberRouting = Routing;

impl Routing {
    pub fn new(transport: TransportKind, address: Address) -> Routing {
        Routing {
            transport,
            address,
        }
    }
}

impl Debug for Routing {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Routing({}@{})", self.transport, self.address)
    }
}

impl Display for Routing {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.transport, self.address)
    }
}


/// The table behind the request and topic routers: at most one routing per message type.
///  Routings are registered at configuration time and never replaced.
#[derive(Debug, Default)]
pub(crate) struct RoutingTable {
    routings: RwLock<FxHashMap<TypeTag, Routing>>,
}

impl RoutingTable {
    pub async fn add(&self, type_tag: TypeTag, routing: Routing) -> Result<(), RouterError> {
        match self.routings.write().await
            .entry(type_tag)
        {
            Entry::Occupied(e) => {
                Err(RouterError::RoutingAlreadyRegistered {
                    type_tag: e.key().clone(),
                    existing: e.get().clone(),
                    attempted: routing,
                })
            }
            Entry::Vacant(e) => {
                debug!(type_tag = %e.key(), %routing, "registered routing");
                e.insert(routing);
                Ok(())
            }
        }
    }

    pub async fn get(&self, type_tag: &TypeTag) -> Option<Routing> {
        self.routings.read().await
            .get(type_tag)
            .cloned()
    }
}
