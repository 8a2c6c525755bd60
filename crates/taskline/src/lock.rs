//! Non-blocking mutual exclusion between workers.
//!
//! A [`Locker`] is shared by every worker that must not run concurrently with
//! the others. Acquisition never waits: when the lock is held elsewhere the
//! invocation is skipped, so a periodic schedule never stalls behind it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::{Job, WorkerError};

/// Mutual-exclusion capability consumed by workers.
///
/// Implementations may be local (see [`LocalLocker`]) or backed by a
/// distributed store; workers only rely on this contract:
///
/// - `acquire` returns immediately, `Ok(())` when exclusivity was obtained and
///   `Err(WorkerError::LockNotAcquired)` (or any other error) otherwise.
/// - `release` is called exactly once after each successful `acquire`.
pub trait Locker: Send + Sync {
    /// Try to obtain exclusivity without waiting.
    fn acquire(&self) -> Result<(), WorkerError>;

    /// Give up exclusivity obtained by a successful `acquire`.
    fn release(&self);
}

/// In-process locker built on an atomic flag.
///
/// # Example
///
/// ```
/// use taskline::{LocalLocker, Locker};
///
/// let locker = LocalLocker::new();
/// assert!(locker.acquire().is_ok());
/// assert!(locker.acquire().is_err());
/// locker.release();
/// assert!(locker.acquire().is_ok());
/// ```
#[derive(Debug, Default)]
pub struct LocalLocker {
    locked: AtomicBool,
}

impl LocalLocker {
    /// Create an unlocked locker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

impl Locker for LocalLocker {
    fn acquire(&self) -> Result<(), WorkerError> {
        self.locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| WorkerError::LockNotAcquired)
    }

    fn release(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }
}

/// RAII guard that releases the lock when dropped.
///
/// Dropping also happens while a panicking job unwinds, so the lock is
/// never left held by a faulted invocation.
struct LockGuard {
    locker: Arc<dyn Locker>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.locker.release();
    }
}

/// Wrap `job` so that every invocation runs only while holding `locker`.
///
/// When `acquire` fails the invocation is skipped entirely: the wrapped job
/// is not called, not retried and not queued.
pub fn with_lock(locker: Arc<dyn Locker>, job: Job) -> Job {
    Job::new(move |token| {
        let locker = locker.clone();
        let job = job.clone();
        async move {
            if let Err(e) = locker.acquire() {
                debug!(error = %e, "Lock held elsewhere, skipping invocation");
                return;
            }
            let _guard = LockGuard { locker };
            job.run(token).await;
        }
    })
}
