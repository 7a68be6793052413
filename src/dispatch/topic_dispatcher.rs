use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::error::RouterError;
use crate::messaging::address::Address;
use crate::messaging::message::{Message, TypeTag};
use crate::messaging::package::{Package, PackageFactory};
use crate::messaging::serializer::Serializer;


/// What happens when a second handler is registered for the same topic type
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DuplicateHandlerPolicy {
    /// the first handler stays registered, registering another one is a no-op
    #[default]
    KeepFirst,
    /// the new handler replaces the previous one
    Overwrite,
}

type TopicInvoker = Arc<dyn Fn(Serializer, Address, Bytes) -> BoxFuture<'static, Result<(), RouterError>> + Send + Sync>;

/// Dispatches received topics to the handler registered for their exact type. Topics without
///  a handler, and packages that are not valid topics, are dropped silently.
pub struct TopicDispatcher {
    package_factory: PackageFactory,
    policy: DuplicateHandlerPolicy,
    handlers: RwLock<FxHashMap<TypeTag, TopicInvoker>>,
}

impl TopicDispatcher {
    pub fn new(package_factory: PackageFactory, policy: DuplicateHandlerPolicy) -> TopicDispatcher {
        TopicDispatcher {
            package_factory,
            policy,
            handlers: Default::default(),
        }
    }

    /// Registers a handler that is called with the address the topic was received from. Returns
    ///  `false` if a handler for `T` was registered before and the policy is to keep it.
    pub async fn register<T, F>(&self, handler: F) -> bool
    where
        T: Message,
        F: Fn(&Address, T) + Send + Sync + 'static,
    {
        self.register_async(move |source: Address, topic: T| {
            handler(&source, topic);
            futures::future::ready(())
        }).await
    }

    pub async fn register_async<T, F, Fut>(&self, handler: F) -> bool
    where
        T: Message,
        F: Fn(Address, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let invoker: TopicInvoker = Arc::new(move |serializer: Serializer, source: Address, body: Bytes| {
            let invocation = serializer.deserialize::<T>(&body)
                .map(|topic| handler(source, topic));
            async move {
                invocation?.await;
                Ok::<_, RouterError>(())
            }.boxed()
        });

        let type_tag = T::type_tag();
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(&type_tag) && self.policy == DuplicateHandlerPolicy::KeepFirst {
            debug!(%type_tag, "a topic handler is registered already - keeping it");
            return false;
        }
        debug!(%type_tag, "registered topic handler");
        handlers.insert(type_tag, invoker);
        true
    }

    /// Calls the handler registered for the topic's exact type, if any.
    pub async fn handle(&self, source: &Address, topic: Package) {
        if !self.package_factory.is_valid_topic(&topic) {
            debug!(?source, package = ?topic, "not a valid topic - discarding");
            return;
        }
        let (type_tag, body) = match topic {
            Package::Topic { type_tag, body } => (type_tag, body),
            _ => return,
        };

        let invoker = self.handlers.read().await
            .get(&type_tag)
            .cloned();
        let Some(invoker) = invoker else {
            trace!(%type_tag, "no handler for topic - discarding");
            return;
        };

        trace!(%type_tag, ?source, "handling topic");
        if let Err(e) = invoker(self.package_factory.serializer(), source.clone(), body).await {
            warn!(%type_tag, ?source, error = %e, "error handling topic");
        }
    }
}
