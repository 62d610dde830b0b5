use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::MetricsConfig;
use crate::error::ConfigError;

/// Fixed-capacity ring buffer; the oldest entry is overwritten on overflow.
#[derive(Debug, Clone)]
pub struct SnapshotRing<T> {
    items: Vec<T>,
    capacity: usize,
    index: usize,
    filled: bool,
}

impl<T> SnapshotRing<T> {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            index: 0,
            filled: false,
        }
    }

    pub fn record(&mut self, item: T) {
        if self.filled {
            self.items[self.index] = item;
        } else {
            self.items.push(item);
        }
        self.index = (self.index + 1) % self.capacity;
        if self.index == 0 {
            self.filled = true;
        }
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        let (newer, older) = if self.filled {
            self.items.split_at(self.index)
        } else {
            (&self.items[..], &[][..])
        };
        older.iter().chain(newer.iter())
    }

    pub fn latest(&self) -> Option<&T> {
        self.iter().next_back()
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Coordination cycle duration tracker.
#[derive(Debug, Clone)]
pub struct CycleTimer {
    history: SnapshotRing<Duration>,
}

impl CycleTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: SnapshotRing::new(capacity),
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.history.record(dt);
    }

    pub fn average(&self) -> Duration {
        let count = self.history.count();
        if count == 0 {
            return Duration::ZERO;
        }
        let total: Duration = self.history.iter().sum();
        total / count as u32
    }

    pub fn max(&self) -> Duration {
        self.history.iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.history.iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        self.history.count()
    }
}

/// Counters and timings for one kind of operation (loads or unloads).
///
/// Durations cover successful operations only; failures are counted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub cancellations: u64,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Duration,
    mean_secs: f64,
}

impl OperationStats {
    fn record_success(&mut self, duration: Duration) {
        self.successes += 1;
        self.total_duration += duration;
        self.min_duration = Some(self.min_duration.map_or(duration, |m| m.min(duration)));
        self.max_duration = self.max_duration.max(duration);
        // Running mean, never recomputed from history.
        self.mean_secs += (duration.as_secs_f64() - self.mean_secs) / self.successes as f64;
    }

    fn record_failure(&mut self, timed_out: bool) {
        self.failures += 1;
        if timed_out {
            self.timeouts += 1;
        }
    }

    pub fn average_duration(&self) -> Duration {
        Duration::from_secs_f64(self.mean_secs.max(0.0))
    }

    /// Failures over finished operations; 0 when nothing finished.
    pub fn failure_rate(&self) -> f64 {
        let finished = self.successes + self.failures;
        if finished == 0 {
            0.0
        } else {
            self.failures as f64 / finished as f64
        }
    }
}

/// Instantaneous engine counts fed in once per cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gauges {
    pub registered: usize,
    pub loaded: usize,
    pub loading: usize,
    pub queued_loads: usize,
    pub queued_unloads: usize,
    pub active_loads: usize,
    pub failed: usize,
}

/// One periodic entry in the metrics history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Seconds since the collector was created.
    pub elapsed_secs: f64,
    pub load_successes: u64,
    pub load_failures: u64,
    pub unload_successes: u64,
    pub memory_bytes: u64,
    pub gauges: Gauges,
}

/// Combined instantaneous and rolling-window figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub load_attempts: u64,
    pub load_successes: u64,
    pub load_failures: u64,
    pub load_timeouts: u64,
    pub load_cancellations: u64,
    pub load_failure_rate: f64,
    pub avg_load_ms: f64,
    pub min_load_ms: f64,
    pub max_load_ms: f64,
    pub unload_attempts: u64,
    pub unload_successes: u64,
    pub unload_failures: u64,
    pub avg_unload_ms: f64,
    pub evictions: u64,
    pub current_memory_bytes: u64,
    pub peak_memory_bytes: u64,
    pub gauges: Gauges,
    /// Successful loads per second across the newest snapshots.
    pub recent_load_throughput: f64,
    pub avg_cycle_ms: f64,
    pub max_cycle_ms: f64,
    pub snapshots: usize,
}

/// Aggregates counters and timings reported by the other components.
/// Records only; it never makes streaming decisions.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    config: MetricsConfig,
    started_at: Instant,
    loads: OperationStats,
    unloads: OperationStats,
    evictions: u64,
    current_memory: u64,
    peak_memory: u64,
    gauges: Gauges,
    cycle_times: CycleTimer,
    history: SnapshotRing<MetricsSnapshot>,
    last_snapshot_at: Option<Instant>,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig, now: Instant) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            cycle_times: CycleTimer::new(config.history_capacity),
            history: SnapshotRing::new(config.history_capacity),
            config,
            started_at: now,
            loads: OperationStats::default(),
            unloads: OperationStats::default(),
            evictions: 0,
            current_memory: 0,
            peak_memory: 0,
            gauges: Gauges::default(),
            last_snapshot_at: None,
        })
    }

    pub fn record_load_started(&mut self) {
        self.loads.attempts += 1;
    }

    pub fn record_load_success(&mut self, duration: Duration) {
        self.loads.record_success(duration);
    }

    pub fn record_load_failure(&mut self, timed_out: bool) {
        self.loads.record_failure(timed_out);
    }

    pub fn record_load_cancelled(&mut self) {
        self.loads.cancellations += 1;
    }

    pub fn record_unload_started(&mut self) {
        self.unloads.attempts += 1;
    }

    pub fn record_unload(&mut self, duration: Duration, success: bool) {
        if success {
            self.unloads.record_success(duration);
        } else {
            self.unloads.record_failure(true);
        }
    }

    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub fn record_memory(&mut self, bytes: u64) {
        self.current_memory = bytes;
        self.peak_memory = self.peak_memory.max(bytes);
    }

    pub fn record_cycle(&mut self, duration: Duration) {
        self.cycle_times.record(duration);
    }

    pub fn set_gauges(&mut self, gauges: Gauges) {
        self.gauges = gauges;
    }

    /// Append a periodic snapshot when `snapshot_interval` has elapsed.
    pub fn roll_up(&mut self, now: Instant) -> Option<&MetricsSnapshot> {
        let due = self.last_snapshot_at.is_none_or(|t| {
            now.saturating_duration_since(t) >= self.config.snapshot_interval
        });
        if !due {
            return None;
        }
        self.last_snapshot_at = Some(now);
        self.history.record(MetricsSnapshot {
            elapsed_secs: now.saturating_duration_since(self.started_at).as_secs_f64(),
            load_successes: self.loads.successes,
            load_failures: self.loads.failures,
            unload_successes: self.unloads.successes,
            memory_bytes: self.current_memory,
            gauges: self.gauges,
        });
        self.history.latest()
    }

    /// Successful loads per second across the newest `throughput_window`
    /// snapshots; 0 until two snapshots exist.
    pub fn recent_load_throughput(&self) -> f64 {
        let window = self.config.throughput_window.min(self.history.count());
        if window < 2 {
            return 0.0;
        }
        let mut recent = self.history.iter().rev().take(window);
        let (Some(newest), Some(oldest)) = (recent.next(), recent.last()) else {
            return 0.0;
        };
        let dt = newest.elapsed_secs - oldest.elapsed_secs;
        if dt <= 0.0 {
            return 0.0;
        }
        newest.load_successes.saturating_sub(oldest.load_successes) as f64 / dt
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            load_attempts: self.loads.attempts,
            load_successes: self.loads.successes,
            load_failures: self.loads.failures,
            load_timeouts: self.loads.timeouts,
            load_cancellations: self.loads.cancellations,
            load_failure_rate: self.loads.failure_rate(),
            avg_load_ms: millis(self.loads.average_duration()),
            min_load_ms: millis(self.loads.min_duration.unwrap_or_default()),
            max_load_ms: millis(self.loads.max_duration),
            unload_attempts: self.unloads.attempts,
            unload_successes: self.unloads.successes,
            unload_failures: self.unloads.failures,
            avg_unload_ms: millis(self.unloads.average_duration()),
            evictions: self.evictions,
            current_memory_bytes: self.current_memory,
            peak_memory_bytes: self.peak_memory,
            gauges: self.gauges,
            recent_load_throughput: self.recent_load_throughput(),
            avg_cycle_ms: millis(self.cycle_times.average()),
            max_cycle_ms: millis(self.cycle_times.max()),
            snapshots: self.history.count(),
        }
    }

    pub fn loads(&self) -> &OperationStats {
        &self.loads
    }

    pub fn unloads(&self) -> &OperationStats {
        &self.unloads
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn history(&self) -> &SnapshotRing<MetricsSnapshot> {
        &self.history
    }

    pub fn cycle_times(&self) -> &CycleTimer {
        &self.cycle_times
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
