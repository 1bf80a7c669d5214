//! Upload progress accounting
//!
//! Byte counters are bumped from worker tasks concurrently. A report is
//! produced each time the uploaded total crosses a multiple of the interval;
//! `fetch_add` hands every caller a distinct previous value, so each
//! crossing is reported exactly once.

use std::sync::atomic::{AtomicU64, Ordering};

/// Default reporting interval (50 MiB)
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 50 * 1024 * 1024;

/// Progress observation emitted at an interval crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    pub bytes_received: u64,
    pub bytes_uploaded: u64,
}

impl ProgressReport {
    pub fn uploaded_mib(&self) -> u64 {
        self.bytes_uploaded / (1024 * 1024)
    }
}

#[derive(Debug)]
pub struct ProgressTracker {
    received: AtomicU64,
    uploaded: AtomicU64,
    interval: u64,
}

impl ProgressTracker {
    pub fn new(interval: u64) -> Self {
        Self {
            received: AtomicU64::new(0),
            uploaded: AtomicU64::new(0),
            interval: interval.max(1),
        }
    }

    /// Count bytes handed to the session; returns the new total
    pub fn record_received(&self, bytes: u64) -> u64 {
        self.received.fetch_add(bytes, Ordering::Relaxed) + bytes
    }

    /// Count bytes accepted by the store
    pub fn record_uploaded(&self, bytes: u64) -> Option<ProgressReport> {
        let previous = self.uploaded.fetch_add(bytes, Ordering::AcqRel);
        let current = previous + bytes;

        if previous / self.interval != current / self.interval {
            Some(ProgressReport {
                bytes_received: self.bytes_received(),
                bytes_uploaded: current,
            })
        } else {
            None
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Acquire)
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reports_on_crossing() {
        let tracker = ProgressTracker::new(100);
        tracker.record_received(250);

        assert_eq!(tracker.record_uploaded(60), None);
        let report = tracker.record_uploaded(60).unwrap();
        assert_eq!(report.bytes_uploaded, 120);
        assert_eq!(report.bytes_received, 250);

        // One report even when a single update crosses several multiples
        assert!(tracker.record_uploaded(130).is_some());
        assert_eq!(tracker.record_uploaded(0), None);
        assert_eq!(tracker.bytes_uploaded(), 250);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_crossings_counted_once() {
        let tracker = Arc::new(ProgressTracker::new(1000));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                (0..1000).filter(|_| tracker.record_uploaded(10).is_some()).count()
            }));
        }

        let mut reports = 0;
        for handle in handles {
            reports += handle.await.unwrap();
        }

        // 80_000 bytes over an interval of 1000
        assert_eq!(reports, 80);
        assert_eq!(tracker.bytes_uploaded(), 80_000);
    }
}
