//! Relay-wide delivery counters.
//!
//! The register is shared (behind an `Arc`) by the intake path, which bumps
//! `received`/`rejected`, and by every dispatch worker, which bumps
//! `completed`/`failed`. Counters only ever grow. Each counter is atomic on
//! its own; a snapshot taken while work is moving may be torn across
//! counters, which is fine for an advisory health surface.
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::Serialize;

/// Shared monotonically increasing counters.
#[derive(Debug, Default)]
pub struct StatsRegister {
    received: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl StatsRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// A job was accepted into the queue.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Release);
    }

    /// A delivery produced an HTTP response.
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Release);
    }

    /// A delivery could not be carried out.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Release);
    }

    /// A job was refused because the queue was full.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Release);
    }

    /// Point-in-time view of all counters.
    ///
    /// Outcomes are loaded before `received`: every job is counted as received
    /// before a worker can see it, so the derived in-flight value never goes
    /// negative.
    pub fn snapshot(&self) -> StatsSnapshot {
        let completed = self.completed.load(Ordering::Acquire);
        let failed = self.failed.load(Ordering::Acquire);
        let rejected = self.rejected.load(Ordering::Acquire);
        let received = self.received.load(Ordering::Acquire);

        StatsSnapshot {
            received,
            completed,
            failed,
            rejected,
        }
    }
}

/// Copy of the counters at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
}

impl StatsSnapshot {
    /// Jobs accepted but not yet completed or failed.
    pub fn in_flight(&self) -> u64 {
        self.received
            .saturating_sub(self.completed)
            .saturating_sub(self.failed)
    }

    /// True when every received job has an outcome.
    pub fn is_settled(&self) -> bool {
        self.in_flight() == 0
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Received : [{}] = Done [{}] + Failed [{}] + Working [{}]",
            self.received,
            self.completed,
            self.failed,
            self.in_flight()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn test_fresh_register_is_zeroed() {
        let stats = StatsRegister::new();
        let snap = stats.snapshot();
        assert_eq!(snap.received, 0);
        assert_eq!(snap.in_flight(), 0);
        assert_eq!(
            snap.to_string(),
            "Received : [0] = Done [0] + Failed [0] + Working [0]"
        );
    }

    #[test]
    fn test_health_line_format() {
        let stats = StatsRegister::new();
        for _ in 0..10 {
            stats.record_received();
        }
        for _ in 0..6 {
            stats.record_completed();
        }
        stats.record_failed();

        assert_eq!(
            stats.snapshot().to_string(),
            "Received : [10] = Done [6] + Failed [1] + Working [3]"
        );
    }

    #[test]
    fn test_rejected_is_not_part_of_received() {
        let stats = StatsRegister::new();
        stats.record_rejected();
        stats.record_rejected();

        let snap = stats.snapshot();
        assert_eq!(snap.rejected, 2);
        assert_eq!(snap.received, 0);
        assert!(snap.is_settled());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let stats = Arc::new(StatsRegister::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_received();
                        stats.record_completed();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.received, 8000);
        assert_eq!(snap.completed, 8000);
        assert!(snap.is_settled());
    }
}
