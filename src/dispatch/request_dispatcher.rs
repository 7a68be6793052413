use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::dispatch::request_task::RequestTask;
use crate::error::{RemoteError, RouterError};
use crate::messaging::message::{Message, TypeTag};
use crate::messaging::package::{Package, PackageFactory};


/// Handles requests of one type, producing the response. This is the 'trait object' way of
///  registering a handler, as an alternative to registering a closure.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RequestHandler<Req: Message, Resp: Message>: Send + Sync + 'static {
    async fn handle(&self, request: Req) -> anyhow::Result<Resp>;
}

/// a registered handler, type-erased: deserializes the request body, calls the handler, and
///  serializes the response
type RequestInvoker = Arc<dyn Fn(PackageFactory, Bytes) -> BoxFuture<'static, Result<(TypeTag, Bytes), RouterError>> + Send + Sync>;

/// Dispatches received requests to the handler registered for the request's exact type, and
///  turns the handler's result into a response package.
///
/// There is at most one handler per request type. Handlers can be registered as synchronous
///  closures, as closures returning a future, or as [RequestHandler] trait objects - they are
///  all treated the same way once registered.
pub struct RequestDispatcher {
    package_factory: PackageFactory,
    handlers: RwLock<FxHashMap<TypeTag, RequestInvoker>>,
}

impl RequestDispatcher {
    pub fn new(package_factory: PackageFactory) -> RequestDispatcher {
        RequestDispatcher {
            package_factory,
            handlers: Default::default(),
        }
    }

    pub async fn register<Req, Resp, F>(&self, handler: F) -> Result<(), RouterError>
    where
        Req: Message,
        Resp: Message,
        F: Fn(Req) -> anyhow::Result<Resp> + Send + Sync + 'static,
    {
        self.register_async(move |request: Req| futures::future::ready(handler(request))).await
    }

    pub async fn register_async<Req, Resp, F, Fut>(&self, handler: F) -> Result<(), RouterError>
    where
        Req: Message,
        Resp: Message,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        let invoker: RequestInvoker = Arc::new(move |package_factory: PackageFactory, body: Bytes| {
            let response = package_factory.serializer()
                .deserialize::<Req>(&body)
                .map(&handler);
            async move {
                let response = response?.await
                    .map_err(RouterError::Handler)?;
                Ok::<_, RouterError>((Resp::type_tag(), package_factory.serialize(&response)?))
            }.boxed()
        });

        self.add_invoker(Req::type_tag(), invoker).await
    }

    pub async fn register_handler<Req: Message, Resp: Message>(&self, handler: Arc<dyn RequestHandler<Req, Resp>>) -> Result<(), RouterError> {
        self.register_async(move |request: Req| {
            let handler = handler.clone();
            async move {
                handler.handle(request).await
            }
        }).await
    }

    async fn add_invoker(&self, type_tag: TypeTag, invoker: RequestInvoker) -> Result<(), RouterError> {
        match self.handlers.write().await
            .entry(type_tag)
        {
            Entry::Occupied(e) => Err(RouterError::HandlerAlreadyRegistered(e.key().clone())),
            Entry::Vacant(e) => {
                debug!(type_tag = %e.key(), "registered request handler");
                e.insert(invoker);
                Ok(())
            }
        }
    }

    pub async fn has_handler<Req: Message>(&self) -> bool {
        self.handlers.read().await
            .contains_key(&Req::type_tag())
    }

    /// Handles a request by calling the handler registered for its exact type, returning the
    ///  response package. Fails if there is no such handler, or if the handler fails.
    pub async fn handle(&self, request: &Package) -> Result<Package, RouterError> {
        let Package::Request { request_id, type_tag, body } = request else {
            return Err(RouterError::InvalidPackage(format!("expected a request, was {:?}", request)));
        };
        if !self.package_factory.is_valid_request(request) {
            debug!(request_id, "request without a type tag");
            return Err(RouterError::InvalidPackage(format!("request {} has no type tag", request_id)));
        }

        let invoker = self.handlers.read().await
            .get(type_tag)
            .cloned()
            .ok_or_else(|| RouterError::HandlerNotFound(type_tag.clone()))?;

        trace!(request_id, %type_tag, "handling request");
        let (response_type, response_body) = invoker(self.package_factory, body.clone()).await?;
        Ok(Package::Response {
            request_id: *request_id,
            outcome: Ok((response_type, response_body)),
        })
    }

    /// Handles a received request and responds to it. Failure is turned into an error response,
    ///  so this always responds exactly once.
    pub async fn handle_task(&self, task: RequestTask) {
        let response = match self.handle(task.request()).await {
            Ok(response) => response,
            Err(e) => {
                warn!(request = ?task.request(), error = %e, "error handling request - sending error response");
                self.package_factory.create_error_response(task.request_id(), RemoteError::from(&e))
            }
        };
        task.respond(response);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::address::Address;
    use crate::messaging::serializer::Serializer;
    use crate::test_util::message::{TestRequest, TestResponse};
    use anyhow::anyhow;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    /// same wire shape as [TestRequest], but a different type
    #[derive(Debug, Serialize, Deserialize)]
    struct OtherRequest {
        value: i64,
    }

    fn factory() -> PackageFactory {
        PackageFactory::new(Serializer::MessagePack, 64 * 1024)
    }

    fn request<T: Message>(value: &T) -> Package {
        factory().create_request(9, value).unwrap()
    }

    async fn respond_to(dispatcher: &RequestDispatcher, request: Package) -> Package {
        let responses = Arc::new(Mutex::new(Vec::new()));
        let responses2 = responses.clone();
        let task = RequestTask::new(request, Address::inproc("svc"), move |p| responses2.lock().unwrap().push(p))
            .unwrap();

        dispatcher.handle_task(task).await;

        let mut responses = responses.lock().unwrap();
        assert_eq!(responses.len(), 1);
        responses.remove(0)
    }

    #[tokio::test]
    async fn test_sync_handler() {
        let dispatcher = RequestDispatcher::new(factory());
        dispatcher.register(|r: TestRequest| Ok(TestResponse { value: r.value + 1 })).await.unwrap();

        let response = dispatcher.handle(&request(&TestRequest { value: 41 })).await.unwrap();
        assert_eq!(response.request_id(), Some(9));
        assert_eq!(factory().extract_response::<TestResponse>(&response).unwrap(), TestResponse { value: 42 });
    }

    #[tokio::test]
    async fn test_async_handler() {
        let dispatcher = RequestDispatcher::new(factory());
        dispatcher.register_async(|r: TestRequest| async move {
            tokio::task::yield_now().await;
            Ok(TestResponse { value: r.value * 2 })
        }).await.unwrap();

        let response = dispatcher.handle(&request(&TestRequest { value: 21 })).await.unwrap();
        assert_eq!(factory().extract_response::<TestResponse>(&response).unwrap(), TestResponse { value: 42 });
    }

    #[tokio::test]
    async fn test_trait_handler() {
        let mut handler = MockRequestHandler::<TestRequest, TestResponse>::new();
        handler.expect_handle()
            .withf(|r| r.value == 1)
            .times(1)
            .returning(|r| Ok(TestResponse { value: r.value + 100 }));

        let dispatcher = RequestDispatcher::new(factory());
        dispatcher.register_handler::<TestRequest, TestResponse>(Arc::new(handler)).await.unwrap();

        let response = dispatcher.handle(&request(&TestRequest { value: 1 })).await.unwrap();
        assert_eq!(factory().extract_response::<TestResponse>(&response).unwrap(), TestResponse { value: 101 });
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let dispatcher = RequestDispatcher::new(factory());
        dispatcher.register(|r: TestRequest| Ok(TestResponse { value: r.value })).await.unwrap();

        let second = dispatcher.register(|_: TestRequest| Ok(TestResponse { value: -1 })).await;
        assert!(matches!(second, Err(RouterError::HandlerAlreadyRegistered(t)) if t == TestRequest::type_tag()));

        let response = dispatcher.handle(&request(&TestRequest { value: 5 })).await.unwrap();
        assert_eq!(factory().extract_response::<TestResponse>(&response).unwrap(), TestResponse { value: 5 });
    }

    #[tokio::test]
    async fn test_dispatch_is_by_exact_type() {
        let dispatcher = RequestDispatcher::new(factory());
        dispatcher.register(|r: TestRequest| Ok(TestResponse { value: r.value })).await.unwrap();
        assert!(dispatcher.has_handler::<TestRequest>().await);
        assert!(!dispatcher.has_handler::<OtherRequest>().await);

        match dispatcher.handle(&request(&OtherRequest { value: 5 })).await {
            Err(RouterError::HandlerNotFound(t)) => assert_eq!(t, OtherRequest::type_tag()),
            other => panic!("expected handler not found, was {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_failure_becomes_error_response() {
        let dispatcher = RequestDispatcher::new(factory());
        dispatcher.register(|_: TestRequest| -> anyhow::Result<TestResponse> { Err(anyhow!("division by zero")) }).await.unwrap();

        let response = respond_to(&dispatcher, request(&TestRequest { value: 1 })).await;
        match factory().extract_response::<TestResponse>(&response) {
            Err(RouterError::Remote(e)) => {
                assert_eq!(e.kind(), "handler");
                assert!(e.message().contains("division by zero"));
            }
            other => panic!("expected remote error, was {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_handler_becomes_error_response() {
        let dispatcher = RequestDispatcher::new(factory());
        let response = respond_to(&dispatcher, request(&TestRequest { value: 1 })).await;
        assert_eq!(response.request_id(), Some(9));
        assert!(matches!(factory().extract_response::<TestResponse>(&response), Err(RouterError::Remote(e)) if e.kind() == "handler_not_found"));
    }

    #[tokio::test]
    async fn test_undecodable_request_becomes_error_response() {
        let dispatcher = RequestDispatcher::new(factory());
        dispatcher.register(|r: TestRequest| Ok(TestResponse { value: r.value })).await.unwrap();

        let garbage = Package::Request { request_id: 9, type_tag: TestRequest::type_tag(), body: Bytes::from_static(&[0xc1]) };
        let response = respond_to(&dispatcher, garbage).await;
        assert!(matches!(factory().extract_response::<TestResponse>(&response), Err(RouterError::Remote(e)) if e.kind() == "serialization"));
    }

    #[tokio::test]
    async fn test_request_without_type_tag_is_rejected() {
        let dispatcher = RequestDispatcher::new(factory());
        let untyped = Package::Request { request_id: 9, type_tag: TypeTag::from_wire(String::new()), body: Bytes::new() };
        assert!(matches!(dispatcher.handle(&untyped).await, Err(RouterError::InvalidPackage(_))));

        let response = respond_to(&dispatcher, untyped).await;
        assert_eq!(response.request_id(), Some(9));
        assert!(matches!(factory().extract_response::<TestResponse>(&response), Err(RouterError::Remote(e)) if e.kind() == "invalid_package"));
    }
}
