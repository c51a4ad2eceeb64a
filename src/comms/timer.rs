use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Single-shot wait timer rented from a [`TimerPool`].
///
/// Armed on acquisition; `fired` reports expiry at most once per arming, so
/// a handle is only good for a single wait.
#[derive(Debug)]
pub(crate) struct WaitTimer {
    deadline: Instant,
    spent: bool,
}

impl WaitTimer {
    #[inline]
    fn armed(after: Duration) -> Self {
        Self {
            deadline: Instant::now() + after,
            spent: false,
        }
    }

    #[inline]
    fn rearm(&mut self, after: Duration) {
        self.deadline = Instant::now() + after;
        self.spent = false;
    }

    /// Edge-triggered expiry check.
    #[inline]
    pub(crate) fn fired(&mut self) -> bool {
        if self.spent {
            return false;
        }
        if Instant::now() >= self.deadline {
            self.spent = true;
            return true;
        }
        false
    }
}

/// Pool of [`WaitTimer`] handles so the send and listen hot paths never set
/// up a fresh timer per wait.
pub(crate) struct TimerPool {
    free: Mutex<Vec<WaitTimer>>,
    minted: AtomicUsize,
}

impl TimerPool {
    pub(crate) fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            minted: AtomicUsize::new(0),
        }
    }

    /// Rent a timer armed to fire once after `after`.
    pub(crate) fn acquire(&self, after: Duration) -> WaitTimer {
        match self.free.lock().unwrap().pop() {
            Some(mut timer) => {
                timer.rearm(after);
                timer
            }
            None => {
                self.minted.fetch_add(1, Ordering::Relaxed);
                WaitTimer::armed(after)
            }
        }
    }

    /// Cancel a rented timer, draining any pending fire, and recycle it.
    pub(crate) fn release(&self, mut timer: WaitTimer) {
        timer.spent = true;
        self.free.lock().unwrap().push(timer);
    }

    /// Number of handles constructed so far.
    pub(crate) fn minted(&self) -> usize {
        self.minted.load(Ordering::Relaxed)
    }
}
