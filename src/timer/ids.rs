use std::{
    fmt,
    num::NonZeroU64,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
};

/// Handle returned by timer registration. Never reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TimerId(NonZeroU64);

impl TimerId {
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Issues [`TimerId`]s in strictly increasing order starting at 1.
///
/// Clones share the same counter, so reactors built from clones of one
/// allocator never hand out the same id.
#[derive(Clone, Debug)]
pub struct TimerIdAllocator {
    next: Arc<AtomicU64>,
}

impl Default for TimerIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerIdAllocator {
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    /// `None` once the id space is exhausted.
    pub fn alloc(&self) -> Option<TimerId> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
            .ok()
            .and_then(NonZeroU64::new)
            .map(TimerId)
    }
}
