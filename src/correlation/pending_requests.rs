use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::connection::callbacks::ResponseHandler;
use crate::correlation::remote_task::{RemoteResult, RemoteTask};
use crate::error::RouterError;
use crate::messaging::package::Package;


type PendingMap = FxHashMap<u64, RemoteTask<Package>>;

/// Keeps track of the requests that were sent over a connection and are waiting for their
///  response, demultiplexing arriving responses by correlation id. Responses may arrive in any
///  order, and responses for requests that timed out before are discarded.
#[derive(Debug, Default)]
pub struct PendingRequests {
    next_request_id: AtomicU64,
    pending: Arc<Mutex<PendingMap>>,
}

impl PendingRequests {
    pub fn new() -> PendingRequests {
        Default::default()
    }

    /// Allocates a fresh correlation id, registering a [RemoteTask] for its response. If no
    ///  response arrives within `timeout`, the request is deregistered and the result fails with
    ///  a timeout.
    pub fn register(&self, timeout: Duration) -> (u64, RemoteResult<Package>) {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let pending_weak = Arc::downgrade(&self.pending);

        // NB: holding the lock while creating the task ensures that the timer can not fire
        //      before the task is registered
        let mut pending = lock(&self.pending);
        let (task, result) = RemoteTask::new(timeout, move || {
            if let Some(pending) = pending_weak.upgrade() {
                lock(&pending).remove(&request_id);
            }
            debug!(request_id, ?timeout, "request timed out");
            None
        });
        pending.insert(request_id, task);

        trace!(request_id, "registered pending request");
        (request_id, result)
    }

    /// Fails a pending request, e.g. because it could not be sent
    pub fn fail(&self, request_id: u64, error: RouterError) {
        let task = lock(&self.pending).remove(&request_id);
        if let Some(task) = task {
            task.complete_with_exception(error);
        }
    }

    pub fn num_pending(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl ResponseHandler for PendingRequests {
    fn on_response(&self, response: Package) {
        let request_id = match &response {
            Package::Response { request_id, .. } => *request_id,
            other => {
                warn!(package = ?other, "received a package that is not a response - discarding");
                return;
            }
        };

        let task = lock(&self.pending).remove(&request_id);
        match task {
            Some(task) => {
                trace!(request_id, "received response");
                task.complete_with_result(response);
            }
            None => debug!(request_id, "received response for an unknown or expired request - discarding"),
        }
    }
}

fn lock(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock()
        .unwrap_or_else(PoisonError::into_inner)
}
