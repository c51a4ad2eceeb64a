use crossbeam::utils::CachePadded;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cheaply clonable one-way flag shared between threads.
///
/// Starts lowered; `raise` is a one-way transition. Wraps the `AtomicBool`
/// in `Arc<CachePadded<...>>` to avoid false sharing on hot polling paths.
#[derive(Clone)]
#[repr(transparent)]
pub struct SharedFlag(Arc<CachePadded<AtomicBool>>);

impl SharedFlag {
    /// Create a new lowered flag.
    #[inline]
    pub fn new() -> Self {
        Self(Arc::new(CachePadded::new(AtomicBool::new(false))))
    }

    /// Raise the flag. Returns `true` only for the call that performed the
    /// transition, so one-shot work can be keyed off it.
    #[inline]
    pub fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::Relaxed)
    }

    /// Current value (relaxed load).
    #[inline(always)]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for SharedFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedFlag").field(&self.is_raised()).finish()
    }
}
