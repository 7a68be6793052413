use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::trace;

use crate::error::RouterError;


/// Remote tasks never time out sooner than this
pub const MIN_REMOTE_TIMEOUT: Duration = Duration::from_millis(5);

/// A [RemoteTask] is the completion side of a single result that arrives from somewhere else,
///  e.g. a response to a request that was sent out. It is created with a timeout, and the timer
///  is armed immediately.
///
/// Exactly one of [RemoteTask::complete_with_result], [RemoteTask::complete_with_exception] and
///  the timer firing takes effect - whichever comes first. All later attempts are no-ops. Once
///  completed, the task releases the timer and the result slot.
///
/// A [RemoteTask] can be cloned and completed from any clone.
pub struct RemoteTask<T: Send + 'static> {
    pending: Arc<Mutex<Option<Pending<T>>>>,
}

struct Pending<T> {
    result_slot: oneshot::Sender<Result<T, RouterError>>,
    timer: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Clone for RemoteTask<T> {
    fn clone(&self) -> Self {
        RemoteTask {
            pending: self.pending.clone(),
        }
    }
}

impl<T: Send + 'static> Debug for RemoteTask<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RemoteTask{{completed:{}}}", self.is_completed())
    }
}

impl<T: Send + 'static> RemoteTask<T> {
    /// Creates a task and arms its timer. When the timer fires before the task is completed
    ///  otherwise, `on_timeout` is called to provide the error - if it returns `None`, the task
    ///  fails with [RouterError::Timeout].
    ///
    /// This must be called from within a Tokio runtime.
    pub fn new(timeout: Duration, on_timeout: impl FnOnce() -> Option<RouterError> + Send + 'static) -> (RemoteTask<T>, RemoteResult<T>) {
        let timeout = timeout.max(MIN_REMOTE_TIMEOUT);
        let (result_slot, result) = oneshot::channel();

        let task = RemoteTask {
            pending: Arc::new(Mutex::new(Some(Pending {
                result_slot,
                timer: None,
            }))),
        };

        let timer_task = task.clone();
        let timer = tokio::spawn(async move {
            sleep(timeout).await;
            timer_task.fire_timer(timeout, on_timeout);
        });

        match task.lock().as_mut() {
            Some(pending) => pending.timer = Some(timer),
            None => timer.abort(),
        }

        (task, RemoteResult { result })
    }

    /// returns `true` if this call completed the task, `false` if it was completed before
    pub fn complete_with_result(&self, result: T) -> bool {
        self.complete(Ok(result))
    }

    /// returns `true` if this call completed the task, `false` if it was completed before
    pub fn complete_with_exception(&self, error: RouterError) -> bool {
        self.complete(Err(error))
    }

    pub fn is_completed(&self) -> bool {
        self.lock().is_none()
    }

    fn complete(&self, result: Result<T, RouterError>) -> bool {
        let Some(pending) = self.lock().take() else {
            return false;
        };
        if let Some(timer) = pending.timer {
            timer.abort();
        }
        if pending.result_slot.send(result).is_err() {
            trace!("remote task completed after the awaiting side went away");
        }
        true
    }

    fn fire_timer(&self, timeout: Duration, on_timeout: impl FnOnce() -> Option<RouterError>) {
        // NB: the timer must not abort its own task, so the handle is just dropped
        let Some(pending) = self.lock().take() else {
            return;
        };
        trace!(?timeout, "remote task timed out");

        let error = on_timeout()
            .unwrap_or(RouterError::Timeout(timeout));
        let _ = pending.result_slot.send(Err(error));
    }

    fn lock(&self) -> MutexGuard<'_, Option<Pending<T>>> {
        self.pending.lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}


/// The awaiting side of a [RemoteTask]
#[derive(Debug)]
pub struct RemoteResult<T> {
    result: oneshot::Receiver<Result<T, RouterError>>,
}

impl<T> RemoteResult<T> {
    pub async fn get(self) -> Result<T, RouterError> {
        self.result.await
            .unwrap_or(Err(RouterError::ReplyDropped))
    }
}
