//! Latency tracking with HdrHistogram.
//!
//! Nanosecond-precision recording for the replay driver and ad-hoc
//! measurement; not wired into any hot path.

use hdrhistogram::Histogram;

/// High-precision latency histogram.
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
}

impl LatencyHistogram {
    /// Create a histogram with 3 significant digits.
    pub fn new() -> Self {
        Self {
            histogram: Histogram::new(3).expect("3 significant digits is a valid precision"),
        }
    }

    /// Record a latency in nanoseconds.
    #[inline(always)]
    pub fn record(&mut self, nanos: u64) {
        let _ = self.histogram.record(nanos);
    }

    /// Value at a percentile in `[0.0, 100.0]`.
    pub fn value_at_percentile(&self, percentile: f64) -> u64 {
        self.histogram.value_at_quantile(percentile / 100.0)
    }

    /// Median latency.
    pub fn p50(&self) -> u64 {
        self.value_at_percentile(50.0)
    }

    /// P90 latency.
    pub fn p90(&self) -> u64 {
        self.value_at_percentile(90.0)
    }

    /// P99 latency.
    pub fn p99(&self) -> u64 {
        self.value_at_percentile(99.0)
    }

    /// P99.9 latency.
    pub fn p999(&self) -> u64 {
        self.value_at_percentile(99.9)
    }

    /// Maximum recorded latency.
    pub fn max(&self) -> u64 {
        self.histogram.max()
    }

    /// Mean recorded latency.
    pub fn mean(&self) -> f64 {
        self.histogram.mean()
    }

    /// Number of recorded samples.
    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    /// Print a one-block percentile summary.
    pub fn print_summary(&self, label: &str) {
        println!("{label} ({} samples)", self.count());
        println!("  p50:   {}", format_nanos(self.p50()));
        println!("  p90:   {}", format_nanos(self.p90()));
        println!("  p99:   {}", format_nanos(self.p99()));
        println!("  p99.9: {}", format_nanos(self.p999()));
        println!("  max:   {}", format_nanos(self.max()));
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a nanosecond value with a readable unit.
pub fn format_nanos(nanos: u64) -> String {
    if nanos < 1_000 {
        format!("{nanos} ns")
    } else if nanos < 1_000_000 {
        format!("{:.2} µs", nanos as f64 / 1_000.0)
    } else if nanos < 1_000_000_000 {
        format!("{:.2} ms", nanos as f64 / 1_000_000.0)
    } else {
        format!("{:.2} s", nanos as f64 / 1_000_000_000.0)
    }
}

/// Low-overhead monotonic timer.
pub struct MonotonicTimer {
    clock: quanta::Clock,
}

impl MonotonicTimer {
    /// Create a timer.
    pub fn new() -> Self {
        Self {
            clock: quanta::Clock::new(),
        }
    }

    /// Raw timestamp; only meaningful relative to another from this timer.
    #[inline(always)]
    pub fn now(&self) -> u64 {
        self.clock.raw()
    }

    /// Elapsed nanoseconds between two raw timestamps.
    #[inline(always)]
    pub fn nanos_between(&self, start: u64, end: u64) -> u64 {
        self.clock.delta_as_nanos(start, end)
    }
}

impl Default for MonotonicTimer {
    fn default() -> Self {
        Self::new()
    }
}
