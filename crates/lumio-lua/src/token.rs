//! Cooperative stop token for scripts running on blocking threads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A cancellation token usable from synchronous code.
///
/// Scripts run on blocking threads, so the async runtime's tokens are of
/// no use mid-`sleep`; this one parks the thread on a condvar and wakes
/// it the moment [`cancel`](Self::cancel) is called.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes every sleeper immediately.
    pub fn cancel(&self) {
        let mut stopped = self.inner.stopped.lock();
        *stopped = true;
        self.inner.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// Sleeps up to `duration`. Returns `true` when woken by cancellation
    /// (immediately, not at the end of the interval).
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if self
                .inner
                .wake
                .wait_for(&mut stopped, deadline - now)
                .timed_out()
            {
                return *stopped;
            }
        }
        true
    }
}
