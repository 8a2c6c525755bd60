//! The unit of background work.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

/// Future produced by one invocation of a [`Job`].
pub type JobFuture = BoxFuture<'static, ()>;

/// A cancellable unit of work with no result.
///
/// Each invocation receives the cancellation token of the scope it runs in.
/// Jobs may run for a long time and may themselves wait on the token.
/// Cloning is cheap: clones share the same function.
///
/// # Example
///
/// ```
/// use taskline::Job;
///
/// let job = Job::new(|token| async move {
///     if !token.is_cancelled() {
///         // do something
///     }
/// });
/// # let _ = job;
/// ```
#[derive(Clone)]
pub struct Job {
    func: Arc<dyn Fn(CancellationToken) -> JobFuture + Send + Sync>,
}

impl Job {
    /// Create a job from an async function taking the cancellation token.
    pub fn new<F, Fut>(job_fn: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            func: Arc::new(move |token| job_fn(token).boxed()),
        }
    }

    /// Invoke the job once.
    pub fn run(&self, token: CancellationToken) -> JobFuture {
        (self.func)(token)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}
