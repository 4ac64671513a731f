// SPDX-License-Identifier: GPL-2.0
//
// boostd: event-driven performance boost coordinator
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Extend-only expiry tracking for the max/flex/wake boost kinds.
//!
//! Concurrent kickers race on a single atomic deadline cell: a request may
//! only push the deadline forward, never truncate a longer boost already in
//! flight. This is the one contended primitive on the kick path and it must
//! stay lock-free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Millisecond tick count on a per-domain monotonic epoch.
pub fn ticks_ms(epoch: Instant) -> u64 {
    Instant::now().duration_since(epoch).as_millis() as u64
}

/// One "do not unboost before" cell for an extendable boost kind.
///
/// `dur_ms` records the duration of the last accepted request so the worker
/// can re-read it when the unboost job eventually runs.
#[derive(Debug, Default)]
pub struct ExpiryCell {
    expires_ms: AtomicU64,
    dur_ms: AtomicU64,
}

impl ExpiryCell {
    pub const fn new() -> Self {
        Self {
            expires_ms: AtomicU64::new(0),
            dur_ms: AtomicU64::new(0),
        }
    }

    /// Try to push the deadline out to `now_ms + requested`.
    ///
    /// Returns the accepted deadline tick, or `None` when a longer boost is
    /// already in effect. Losing a CAS race re-reads and retries the whole
    /// comparison; rejection is expected control flow, not an error.
    pub fn extend(&self, now_ms: u64, requested: Duration) -> Option<u64> {
        let req_ms = requested.as_millis() as u64;
        let candidate = now_ms + req_ms;

        let mut cur = self.expires_ms.load(Ordering::Relaxed);
        loop {
            if cur > candidate {
                return None;
            }
            match self.expires_ms.compare_exchange_weak(
                cur,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }

        self.dur_ms.store(req_ms, Ordering::Relaxed);
        Some(candidate)
    }

    /// Deadline tick of the latest accepted request.
    pub fn deadline_ms(&self) -> u64 {
        self.expires_ms.load(Ordering::Relaxed)
    }

    /// Duration of the latest accepted request.
    pub fn last_duration(&self) -> Duration {
        Duration::from_millis(self.dur_ms.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn shorter_request_never_truncates() {
        let cell = ExpiryCell::new();

        assert_eq!(cell.extend(0, Duration::from_millis(500)), Some(500));
        // 10ms later a 100ms boost lands: rejected, deadline unchanged.
        assert_eq!(cell.extend(10, Duration::from_millis(100)), None);
        assert_eq!(cell.deadline_ms(), 500);
        assert_eq!(cell.last_duration(), Duration::from_millis(500));
    }

    #[test]
    fn longer_request_extends() {
        let cell = ExpiryCell::new();
        assert_eq!(cell.extend(0, Duration::from_millis(100)), Some(100));
        assert_eq!(cell.extend(50, Duration::from_millis(100)), Some(150));
        assert_eq!(cell.deadline_ms(), 150);
    }

    #[test]
    fn identical_requests_may_both_accept() {
        // Two back-to-back identical durations both accept when the second
        // strictly advances now; the timer is re-armed to the later deadline.
        let cell = ExpiryCell::new();
        assert!(cell.extend(0, Duration::from_millis(200)).is_some());
        assert!(cell.extend(1, Duration::from_millis(200)).is_some());
        assert_eq!(cell.deadline_ms(), 201);
    }

    #[test]
    fn concurrent_extends_keep_max() {
        let cell = Arc::new(ExpiryCell::new());
        let mut handles = Vec::new();
        for i in 0..8u64 {
            let cell = Arc::clone(&cell);
            handles.push(std::thread::spawn(move || {
                for j in 0..1000u64 {
                    cell.extend(j, Duration::from_millis(i * 10));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        // Largest candidate ever offered: now=999 + 70ms.
        assert_eq!(cell.deadline_ms(), 999 + 70);
    }
}
