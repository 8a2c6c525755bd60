//! On-demand triggering of a worker inside a group.

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::group::Entry;
use crate::{Group, Worker, WorkerError};

/// A worker bound to a group, run once per trigger.
///
/// Each [`run`](OnDemand::run) submits a single [`Worker::run_once`] to the
/// group, so the execution is stopped and waited for with the group.
/// Triggers follow the group phase: while pending they are held.
#[derive(Clone, Debug)]
pub struct OnDemand {
    group: Group,
    worker: Worker,
}

impl OnDemand {
    pub(crate) fn new(group: Group, worker: Worker) -> Self {
        Self { group, worker }
    }

    /// Trigger one execution of the worker within the group.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::GroupStopped` when the group no longer accepts
    /// work; the job is not invoked in that case.
    pub async fn run(&self) -> Result<(), WorkerError> {
        let worker = self.worker.clone();
        let entry: Entry =
            Box::new(move |token: CancellationToken| async move { worker.run_once(token).await }.boxed());
        self.group.submit(entry, true).await
    }

    /// The bound worker.
    pub fn worker(&self) -> &Worker {
        &self.worker
    }
}
