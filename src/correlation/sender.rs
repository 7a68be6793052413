use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::connection::directional::SenderConnection;
use crate::correlation::pending_requests::PendingRequests;
use crate::error::RouterError;
use crate::messaging::message::Message;
use crate::messaging::package::{Package, PackageFactory};


/// A [Sender] is a sender connection together with the bookkeeping for its outstanding
///  requests. Any number of requests can be in flight concurrently, each with its own
///  correlation id and timeout.
pub struct Sender {
    connection: Arc<dyn SenderConnection>,
    pending: Arc<PendingRequests>,
}

impl Debug for Sender {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sender{{connection:{:?}, num_pending:{}}}", self.connection, self.pending.num_pending())
    }
}

impl Sender {
    /// `pending` must be the response handler `connection` was created with
    pub fn new(connection: Arc<dyn SenderConnection>, pending: Arc<PendingRequests>) -> Sender {
        Sender {
            connection,
            pending,
        }
    }

    pub fn connection(&self) -> &Arc<dyn SenderConnection> {
        &self.connection
    }

    /// Sends a request and waits for the response package, or until the timeout expires.
    ///  The response package may be an error response.
    pub async fn send_and_receive<T: Message>(&self, package_factory: &PackageFactory, request: &T, timeout: Duration) -> Result<Package, RouterError> {
        let (request_id, response) = self.pending.register(timeout);

        match package_factory.create_request(request_id, request) {
            Ok(package) => {
                trace!(request_id, ?request, "sending request");
                if let Err(e) = self.connection.transmit(package).await {
                    self.pending.fail(request_id, e.into());
                }
            }
            Err(e) => self.pending.fail(request_id, e),
        }

        let response = response.get().await?;
        if !package_factory.is_valid_response(&response) {
            debug!(?response, "not a valid response - discarding");
            return Err(RouterError::InvalidPackage(format!("not a valid response: {:?}", response)));
        }
        Ok(response)
    }
}
