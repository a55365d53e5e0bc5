//! Strictly increasing stamps derived from the wall clock.

use std::sync::atomic::{AtomicI64, Ordering};

/// Follows the clock readings it is given, but never repeats a value or
/// goes backwards when the clock does.
#[derive(Debug, Default)]
pub struct MonotonicStamp {
    last: AtomicI64,
}

impl MonotonicStamp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `now`, or one past the previous stamp if `now` is not ahead of it.
    pub fn next(&self, now: i64) -> i64 {
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        now.max(previous.saturating_add(1))
    }
}
