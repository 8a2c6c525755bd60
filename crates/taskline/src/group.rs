//! Supervised groups of workers sharing one cancellable lifecycle.
//!
//! Every group owns a supervising task that is the only reader of the
//! intake channel and the only owner of the execution tracker. Shutdown
//! takes two steps: [`Group::stop`] cancels the lifecycle, then
//! [`Group::wait`] blocks until every started job has returned.
//!
//! Groups start in the *pending* phase: added workers are held until
//! [`Group::run`] activates the group, after which additions start at once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::job::JobFuture;
use crate::on_demand::OnDemand;
use crate::{Job, Worker, WorkerError};

const INTAKE_CAPACITY: usize = 16;

/// Entry point handed to the supervising task, started with the group token.
pub(crate) type Entry = Box<dyn FnOnce(CancellationToken) -> JobFuture + Send>;

enum Command {
    Submit {
        entry: Entry,
        /// Hold while pending; `false` starts immediately in either phase
        hold: bool,
        accepted: oneshot::Sender<()>,
    },
    Activate {
        activated: oneshot::Sender<()>,
    },
}

/// Handle to a group of concurrently running workers.
///
/// Clones refer to the same group. Must be created inside a tokio runtime.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use taskline::{Group, Job, Worker};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), taskline::WorkerError> {
/// let group = Group::new(&CancellationToken::new());
/// let ticker = Worker::builder(Job::new(|_token| async { /* work */ }))
///     .by_ticker(Duration::from_millis(10))
///     .build();
///
/// group.add([ticker]).await?;
/// group.run().await;
///
/// group.stop();
/// group.wait(Some(Duration::from_secs(5))).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Group {
    intake: mpsc::Sender<Command>,
    token: CancellationToken,
    closed: CancellationToken,
}

impl Group {
    /// Create a pending group whose lifecycle is a child of `parent`.
    ///
    /// Cancelling `parent` stops the group; stopping the group never
    /// affects `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        let (intake, commands) = mpsc::channel(INTAKE_CAPACITY);
        let token = parent.child_token();
        let closed = CancellationToken::new();

        tokio::spawn(supervise(commands, token.clone(), closed.clone()));

        Self {
            intake,
            token,
            closed,
        }
    }

    /// Add workers to the group.
    ///
    /// While the group is pending the workers are held; once running,
    /// each one starts immediately on its own task.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::GroupStopped` once the group is stopped, even
    /// while it is still draining; it accepts nothing new. Workers after the
    /// failing one are not submitted.
    pub async fn add<I>(&self, workers: I) -> Result<(), WorkerError>
    where
        I: IntoIterator<Item = Worker>,
    {
        for worker in workers {
            self.submit(run_entry(worker), true).await?;
        }
        Ok(())
    }

    /// Activate the group: start held workers, and start later additions
    /// immediately. Repeated calls, or calls after stop, do nothing.
    ///
    /// Returns once the held workers have been started.
    pub async fn run(&self) {
        let (activated, ack) = oneshot::channel();
        // A closed intake means the group already stopped
        if self.intake.send(Command::Activate { activated }).await.is_ok() {
            let _ = ack.await;
        }
    }

    /// Bind `worker` to this group for on-demand single runs.
    pub fn on_demand(&self, worker: Worker) -> OnDemand {
        OnDemand::new(self.clone(), worker)
    }

    /// Cancel the group lifecycle. Idempotent, does not wait.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Wait until every started job has returned.
    ///
    /// With a deadline, returns `WorkerError::WaitTimeout` once it elapses.
    /// The group keeps draining in the background, and a job that never
    /// returns keeps it undrained forever: the deadline bounds the caller's
    /// wait, it does not terminate anything.
    pub async fn wait(&self, deadline: Option<Duration>) -> Result<(), WorkerError> {
        match deadline {
            None => {
                self.closed.cancelled().await;
                Ok(())
            }
            Some(deadline) => tokio::time::timeout(deadline, self.closed.cancelled())
                .await
                .map_err(|_| WorkerError::WaitTimeout(deadline)),
        }
    }

    /// Attach child groups.
    ///
    /// When this group stops, every child is stopped and then waited for,
    /// in the given order, so this group only drains after all children
    /// have drained. The cascade starts even while this group is pending.
    pub async fn add_group<I>(&self, children: I) -> Result<(), WorkerError>
    where
        I: IntoIterator<Item = Group>,
    {
        let children: Arc<[Group]> = children.into_iter().collect();
        let cascade = Job::new(move |token: CancellationToken| {
            let children = children.clone();
            async move {
                token.cancelled().await;
                for child in children.iter() {
                    child.stop();
                }
                for child in children.iter() {
                    let _ = child.wait(None).await;
                }
            }
        });

        let worker = Worker::builder(cascade).name("group-cascade").build();
        self.submit(run_entry(worker), false).await
    }

    /// Lifecycle token of the group, for deriving nested scopes.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the lifecycle was cancelled (by `stop` or by the parent).
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the group has drained; it accepts nothing from now on.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) async fn submit(&self, entry: Entry, hold: bool) -> Result<(), WorkerError> {
        if self.closed.is_cancelled() {
            return Err(WorkerError::GroupStopped);
        }

        let (accepted, ack) = oneshot::channel();
        self.intake
            .send(Command::Submit {
                entry,
                hold,
                accepted,
            })
            .await
            .map_err(|_| WorkerError::GroupStopped)?;

        // Dropped unacknowledged when the loop stopped before taking it
        ack.await.map_err(|_| WorkerError::GroupStopped)
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("stopped", &self.is_stopped())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn run_entry(worker: Worker) -> Entry {
    Box::new(move |token: CancellationToken| async move { worker.run(token).await }.boxed())
}

/// Supervising loop: accepting, then draining, then closed.
async fn supervise(
    mut commands: mpsc::Receiver<Command>,
    token: CancellationToken,
    closed: CancellationToken,
) {
    let tracker = TaskTracker::new();
    // `Some` while pending
    let mut held: Option<Vec<Entry>> = Some(Vec::new());

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            command = commands.recv() => match command {
                Some(Command::Submit { entry, hold, accepted }) => {
                    match held.as_mut() {
                        Some(queue) if hold => queue.push(entry),
                        _ => {
                            tracker.spawn(entry(token.clone()));
                        }
                    }
                    let _ = accepted.send(());
                }
                Some(Command::Activate { activated }) => {
                    if let Some(queue) = held.take() {
                        debug!(held = queue.len(), "Group activated");
                        for entry in queue {
                            tracker.spawn(entry(token.clone()));
                        }
                    }
                    let _ = activated.send(());
                }
                // Every handle is gone; only the parent can stop us now
                None => {
                    token.cancelled().await;
                    break;
                }
            },
        }
    }

    // Unacknowledged submissions fail with GroupStopped
    drop(commands);
    if let Some(queue) = held.filter(|queue| !queue.is_empty()) {
        debug!(discarded = queue.len(), "Group stopped before activation");
    }

    tracker.close();
    debug!(in_flight = tracker.len(), "Group draining");
    tracker.wait().await;

    closed.cancel();
    debug!("Group closed");
}
