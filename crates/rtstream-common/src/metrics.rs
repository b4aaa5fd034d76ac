//! Per-task cycle metrics.
//!
//! A fixed-size ring buffer of elapsed cycle times, allocated once when the
//! task is created so recording inside the cycle loop never allocates.

use crate::time::Timespec;
use serde::Serialize;

/// Elapsed-time statistics for one periodic task.
#[derive(Debug)]
pub struct CycleMetrics {
    /// Ring buffer of elapsed times in nanoseconds.
    samples: Box<[u64]>,
    write_pos: usize,
    /// Number of valid samples (saturates at buffer size).
    sample_count: usize,
    total_cycles: u64,
    min_ns: u64,
    max_ns: u64,
    sum_ns: u64,
    /// Cycles whose elapsed time reached the period.
    overrun_count: u64,
    period_ns: u64,
}

impl CycleMetrics {
    /// Create a collector retaining `history` samples for a task with `period`.
    #[must_use]
    pub fn new(history: usize, period: Timespec) -> Self {
        let size = history.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_cycles: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            overrun_count: 0,
            period_ns: period.as_nanos_u64(),
        }
    }

    /// Record one cycle's elapsed time.
    pub fn record(&mut self, elapsed: Timespec) {
        let ns = elapsed.as_nanos_u64();

        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = (self.sample_count + 1).min(self.samples.len());

        self.total_cycles += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.wrapping_add(ns);

        if ns >= self.period_ns {
            self.overrun_count += 1;
        }
    }

    /// Total cycles recorded.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Cycles whose elapsed time reached the period.
    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    /// Shortest recorded cycle.
    #[must_use]
    pub fn min(&self) -> Option<Timespec> {
        (self.total_cycles > 0).then(|| Timespec::from_nanos(self.min_ns))
    }

    /// Longest recorded cycle.
    #[must_use]
    pub fn max(&self) -> Option<Timespec> {
        (self.total_cycles > 0).then(|| Timespec::from_nanos(self.max_ns))
    }

    /// Mean cycle time.
    #[must_use]
    pub fn mean(&self) -> Option<Timespec> {
        (self.total_cycles > 0).then(|| Timespec::from_nanos(self.sum_ns / self.total_cycles))
    }

    /// Percentile (0.0 to 100.0) over the retained samples.
    ///
    /// Returns `None` without samples or for an out-of-range percentile.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<Timespec> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(Timespec::from_nanos(sorted[idx.min(sorted.len() - 1)]))
    }

    /// Snapshot for logging.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_cycles: self.total_cycles,
            min_ns: self.min().map(|t| t.as_nanos_u64()),
            max_ns: self.max().map(|t| t.as_nanos_u64()),
            mean_ns: self.mean().map(|t| t.as_nanos_u64()),
            overrun_count: self.overrun_count,
            period_ns: self.period_ns,
        }
    }
}

/// Immutable snapshot of metrics for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Total cycles executed.
    pub total_cycles: u64,
    /// Minimum cycle time in nanoseconds.
    pub min_ns: Option<u64>,
    /// Maximum cycle time in nanoseconds.
    pub max_ns: Option<u64>,
    /// Mean cycle time in nanoseconds.
    pub mean_ns: Option<u64>,
    /// Cycles that reached the period.
    pub overrun_count: u64,
    /// Task period in nanoseconds.
    pub period_ns: u64,
}

impl MetricsSnapshot {
    /// Jitter (max - min) in nanoseconds.
    #[must_use]
    pub fn jitter_ns(&self) -> Option<u64> {
        match (self.min_ns, self.max_ns) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }

    /// Mean cycle time as a fraction of the period.
    #[must_use]
    pub fn utilization(&self) -> Option<f64> {
        match self.mean_ns {
            Some(mean) if self.period_ns > 0 => Some(mean as f64 / self.period_ns as f64),
            _ => None,
        }
    }
}
