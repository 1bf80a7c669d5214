//! Prometheus metrics for monitoring
//!
//! Provides counters, gauges, and histograms for observability, plus the
//! standard upload metrics exported at `/metrics`.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: String,
    help: String,
}

impl Counter {
    /// Create a new counter
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by delta
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: String,
    help: String,
}

impl Gauge {
    /// Create a new gauge
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by 1
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Bucket upper bounds in seconds, sized for multi-MiB part uploads
const LATENCY_BUCKETS: [f64; 12] = [
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

/// Histogram for latency measurements
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    /// Sum of observations in microseconds
    sum_micros: AtomicU64,
    count: AtomicU64,
    name: String,
    help: String,
}

impl Histogram {
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            buckets: LATENCY_BUCKETS
                .iter()
                .map(|bound| (*bound, AtomicU64::new(0)))
                .collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Record one elapsed duration
    pub fn observe_duration(&self, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64();
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        for (bound, count) in &self.buckets {
            if seconds <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of observations
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        let mut output = format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.name, self.help, self.name
        );

        for (bound, count) in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name,
                bound,
                count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", self.name, self.count()));

        let sum_secs = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str(&format!("{}_sum {}\n", self.name, sum_secs));
        output.push_str(&format!("{}_count {}\n", self.name, self.count()));

        output
    }
}

/// Standard Stratus metrics
pub mod standard {
    use super::*;
    use std::sync::LazyLock;

    pub static UPLOADS_STARTED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("stratus_uploads_started_total", "Multipart upload sessions started")
    });

    pub static UPLOADS_COMPLETED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("stratus_uploads_completed_total", "Uploads completed successfully")
    });

    pub static UPLOADS_FAILED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("stratus_uploads_failed_total", "Uploads failed by a store error")
    });

    pub static UPLOADS_ABORTED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("stratus_uploads_aborted_total", "Uploads aborted before completion")
    });

    pub static PARTS_UPLOADED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("stratus_parts_uploaded_total", "Parts accepted by the object store")
    });

    pub static BYTES_UPLOADED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("stratus_bytes_uploaded_total", "Total bytes uploaded to storage")
    });

    pub static PARTS_IN_FLIGHT: LazyLock<Gauge> = LazyLock::new(|| {
        Gauge::new("stratus_parts_in_flight", "Part uploads currently holding a permit")
    });

    pub static ACTIVE_SESSIONS: LazyLock<Gauge> = LazyLock::new(|| {
        Gauge::new("stratus_active_sessions", "Upload sessions not yet terminal")
    });

    pub static PART_UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new("stratus_part_upload_duration_seconds", "Part upload latency")
    });
}

/// Helper to gather all standard metrics
pub fn gather_system_metrics() -> String {
    let mut output = String::new();

    // Counters
    output.push_str(&standard::UPLOADS_STARTED.to_prometheus());
    output.push_str(&standard::UPLOADS_COMPLETED.to_prometheus());
    output.push_str(&standard::UPLOADS_FAILED.to_prometheus());
    output.push_str(&standard::UPLOADS_ABORTED.to_prometheus());
    output.push_str(&standard::PARTS_UPLOADED.to_prometheus());
    output.push_str(&standard::BYTES_UPLOADED.to_prometheus());

    // Gauges
    output.push_str(&standard::PARTS_IN_FLIGHT.to_prometheus());
    output.push_str(&standard::ACTIVE_SESSIONS.to_prometheus());

    // Histograms
    output.push_str(&standard::PART_UPLOAD_DURATION.to_prometheus());

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("test_counter", "Test counter");
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
        assert!(counter.to_prometheus().contains("# TYPE test_counter counter\ntest_counter 6\n"));
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new("test_gauge", "Test gauge");
        gauge.inc();
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 1);
        assert!(gauge.to_prometheus().ends_with("test_gauge 1\n"));
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new("test_histogram", "Test histogram");

        histogram.observe_duration(Duration::from_millis(20));
        histogram.observe_duration(Duration::from_millis(200));
        histogram.observe_duration(Duration::from_secs(400));

        let prometheus = histogram.to_prometheus();
        assert!(prometheus.contains("test_histogram_bucket{le=\"0.05\"} 1\n"));
        assert!(prometheus.contains("test_histogram_bucket{le=\"300\"} 2\n"));
        assert!(prometheus.contains("test_histogram_bucket{le=\"+Inf\"} 3\n"));
        assert!(prometheus.contains("test_histogram_count 3"));
    }

    #[test]
    fn test_gather_includes_upload_metrics() {
        let output = gather_system_metrics();
        assert!(output.contains("stratus_uploads_started_total"));
        assert!(output.contains("stratus_part_upload_duration_seconds_count"));
    }
}
