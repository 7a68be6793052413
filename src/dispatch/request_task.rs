use std::fmt::{Debug, Formatter};

use tracing::warn;

use crate::error::{RemoteError, RouterError};
use crate::messaging::address::Address;
use crate::messaging::package::Package;


type Responder = Box<dyn FnOnce(Package) + Send>;

/// A request that was received, paired with the means to send its response back to the
///  requesting side.
///
/// The response is sent exactly once: [RequestTask::respond] consumes the task, and a task that
///  is dropped without a response (e.g. because the handler panicked) sends an error response
///  with kind [RemoteError::BROKEN_PROMISE]. That way the requesting side never waits for a
///  response that will not come.
pub struct RequestTask {
    request: Package,
    receiver_address: Address,
    responder: Option<Responder>,
}

impl Debug for RequestTask {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RequestTask{{request:{:?}, receiver_address:{:?}, responded:{}}}", self.request, self.receiver_address, self.responder.is_none())
    }
}

impl RequestTask {
    /// `request` must be a [Package::Request]. `responder` sends a response package back to the
    ///  requesting side; it is called exactly once.
    pub fn new(request: Package, receiver_address: Address, responder: impl FnOnce(Package) + Send + 'static) -> Result<RequestTask, RouterError> {
        if !matches!(request, Package::Request { .. }) {
            return Err(RouterError::InvalidPackage(format!("expected a request, was {:?}", request)));
        }
        Ok(RequestTask {
            request,
            receiver_address,
            responder: Some(Box::new(responder)),
        })
    }

    pub fn request(&self) -> &Package {
        &self.request
    }

    pub fn request_id(&self) -> u64 {
        self.request.request_id()
            .unwrap_or_default()
    }

    /// the local address the request was received on
    pub fn receiver_address(&self) -> &Address {
        &self.receiver_address
    }

    pub fn respond(mut self, response: Package) {
        if let Some(responder) = self.responder.take() {
            responder(response);
        }
    }
}

impl Drop for RequestTask {
    fn drop(&mut self) {
        if let Some(responder) = self.responder.take() {
            warn!(request = ?self.request, "request task dropped without a response - sending broken promise");
            responder(Package::Response {
                request_id: self.request_id(),
                outcome: Err(RemoteError::broken_promise()),
            });
        }
    }
}
