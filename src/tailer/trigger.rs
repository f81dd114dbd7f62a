// SPDX-License-Identifier: Apache-2.0

//! Poll-interval primitives for the tailer loops.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Granularity at which a sleeping wait re-checks for cancellation.
const CANCEL_CHECK_SLICE: Duration = Duration::from_millis(20);

/// Outcome of waiting on a [`Trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// The wait ran its course; the caller should poll again.
    Elapsed,
    /// A stop request was observed during the wait.
    Cancelled,
}

/// The suspension point between tailer polls.
///
/// `wait` is the only place the tailer blocks between rounds of file I/O.
/// Implementations must return [`Wait::Cancelled`] promptly once the
/// tailer's stop signal fires.
pub trait Trigger: Send {
    fn wait(&mut self) -> Wait;
}

/// Sleep for `duration`, returning early if `cancel` fires.
pub(crate) fn sleep_observing(cancel: &CancellationToken, duration: Duration) -> Wait {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return Wait::Cancelled;
        }
        let now = Instant::now();
        if now >= deadline {
            return Wait::Elapsed;
        }
        std::thread::sleep((deadline - now).min(CANCEL_CHECK_SLICE));
    }
}

/// Default trigger: a fixed-interval timer.
pub struct TimerTrigger {
    interval: Duration,
    cancel: CancellationToken,
}

impl TimerTrigger {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }
}

impl Trigger for TimerTrigger {
    fn wait(&mut self) -> Wait {
        sleep_observing(&self.cancel, self.interval)
    }
}
