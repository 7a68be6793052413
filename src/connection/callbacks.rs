//! Callbacks through which connections hand received packages to the routing core.
//!
//! They are passed around as `Arc<dyn ...>` to minimize dependencies of transport implementations.
//!  They are called from a connection's receive loop, so implementations must not block: they hand
//!  the actual work off to a separate task and return immediately.

use crate::dispatch::request_task::RequestTask;
use crate::messaging::address::Address;
use crate::messaging::package::Package;


/// receives responses arriving on a sender connection
pub trait ResponseHandler: Send + Sync {
    fn on_response(&self, response: Package);
}

/// receives requests arriving on a receiver connection, each paired with the means to respond
pub trait RequestTaskHandler: Send + Sync {
    fn on_request(&self, task: RequestTask);
}

/// receives topic packages arriving on a subscriber connection
pub trait TopicHandler: Send + Sync {
    fn on_topic(&self, source: &Address, topic: Package);
}
