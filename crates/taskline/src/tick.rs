//! Tick sources: producers of timed "fire" events.
//!
//! A [`TickSource`] is a channel receiver with room for a single pending
//! tick. Producers use `try_send`, so ticks that arrive while the previous
//! one is still unconsumed are dropped rather than queued.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::Job;

/// Receiving side of a tick producer.
pub type TickSource = mpsc::Receiver<DateTime<Utc>>;

/// Smallest period accepted by interval based producers.
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Handle for stopping a tick producer.
///
/// Dropping the [`TickSource`] also stops its producer; the handle exists
/// for owners that keep the receiver elsewhere (e.g. inside a pool job).
#[derive(Debug, Clone)]
pub struct TickHandle {
    token: CancellationToken,
}

impl TickHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Stop producing ticks. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Check if the producer was asked to stop.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Create a channel pair sized for one pending tick.
pub(crate) fn tick_channel() -> (mpsc::Sender<DateTime<Utc>>, TickSource) {
    mpsc::channel(1)
}

/// Spawn a producer ticking every `period`, first tick one period from now.
///
/// Must be called from within a tokio runtime.
pub fn interval_ticks(period: Duration) -> (TickSource, TickHandle) {
    let period = period.max(MIN_TICK_PERIOD);
    let (tx, rx) = tick_channel();
    let token = CancellationToken::new();
    let handle = TickHandle::new(token.clone());

    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tx.closed() => break,
                _ = interval.tick() => {
                    // Full means the consumer is still busy with the previous tick
                    let _ = tx.try_send(Utc::now());
                }
            }
        }
    });

    (rx, handle)
}

/// Invoke `job` once per received tick until the source closes or `token`
/// is cancelled. Cancellation wins over a tick that is ready at the same time.
pub(crate) async fn drive(job: &Job, token: &CancellationToken, ticks: &mut TickSource) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            tick = ticks.recv() => match tick {
                Some(_) => job.run(token.clone()).await,
                None => return,
            },
        }
    }
}
