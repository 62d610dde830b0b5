use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use assetstream_common::ResourceKey;
use serde::{Deserialize, Serialize};

use crate::config::MemoryConfig;
use crate::error::ConfigError;
use crate::metrics::MetricsCollector;
use crate::queue::QueueManager;
use crate::registry::AssetRegistry;
use crate::resource::ResourceState;

/// Memory pressure classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum PressureLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// Source of the process's current memory usage.
pub trait MemoryProbe: Send {
    /// Resident bytes, or `None` when the platform cannot tell.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads `VmRSS` from `/proc/self/status`. Returns `None` off Linux.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    #[cfg(target_os = "linux")]
    fn resident_bytes(&self) -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss(&status)
    }

    #[cfg(not(target_os = "linux"))]
    fn resident_bytes(&self) -> Option<u64> {
        None
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

/// Externally driven gauge. Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct MemoryGauge(Arc<AtomicU64>);

impl MemoryGauge {
    pub fn new(bytes: u64) -> Self {
        Self(Arc::new(AtomicU64::new(bytes)))
    }

    pub fn set(&self, bytes: u64) {
        self.0.store(bytes, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl MemoryProbe for MemoryGauge {
    fn resident_bytes(&self) -> Option<u64> {
        Some(self.get())
    }
}

/// Bookkeeping for one loaded resource.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    pub estimated_size: u64,
    pub last_access_time: Instant,
    pub load_time: Instant,
    pub access_count: u64,
}

/// What one [`MemoryManager::update`] call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryReport {
    pub level: PressureLevel,
    pub sampled: bool,
    /// Pressure entered `Critical` during this update.
    pub escalated: bool,
    pub evicted: Vec<ResourceKey>,
}

/// Samples memory pressure and evicts stale or excess resources.
///
/// Records mirror the registry's `Loaded` set: the queue manager calls
/// `track` on every successful load and `untrack` on every unload.
pub struct MemoryManager {
    config: MemoryConfig,
    probe: Box<dyn MemoryProbe>,
    records: BTreeMap<ResourceKey, MemoryRecord>,
    level: PressureLevel,
    current_bytes: u64,
    peak_bytes: u64,
    last_sample: Option<Instant>,
    last_cleanup: Option<Instant>,
    total_evictions: u64,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig, probe: Box<dyn MemoryProbe>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            probe,
            records: BTreeMap::new(),
            level: PressureLevel::Low,
            current_bytes: 0,
            peak_bytes: 0,
            last_sample: None,
            last_cleanup: None,
            total_evictions: 0,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn set_thresholds(&mut self, high: u64, critical: u64) -> Result<(), ConfigError> {
        let config = MemoryConfig {
            high_threshold_bytes: high,
            critical_threshold_bytes: critical,
            ..self.config.clone()
        };
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn set_cleanup_interval(&mut self, interval: std::time::Duration) -> Result<(), ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::Zero("cleanup_interval"));
        }
        self.config.cleanup_interval = interval;
        Ok(())
    }

    /// Classify `bytes` against the configured thresholds.
    pub fn classify(&self, bytes: u64) -> PressureLevel {
        if bytes >= self.config.critical_threshold_bytes {
            PressureLevel::Critical
        } else if bytes >= self.config.high_threshold_bytes {
            PressureLevel::High
        } else if bytes >= self.config.medium_threshold_bytes() {
            PressureLevel::Medium
        } else {
            PressureLevel::Low
        }
    }

    /// Read the probe (falling back to tracked sizes) and reclassify.
    pub fn sample_pressure(&mut self) -> PressureLevel {
        let bytes = self
            .probe
            .resident_bytes()
            .unwrap_or_else(|| self.tracked_bytes());
        self.current_bytes = bytes;
        self.peak_bytes = self.peak_bytes.max(bytes);

        let level = self.classify(bytes);
        if level != self.level {
            tracing::info!(from = ?self.level, to = ?level, bytes, "memory pressure changed");
        }
        self.level = level;
        level
    }

    pub fn track(&mut self, key: ResourceKey, estimated_size: u64, now: Instant) {
        self.records.insert(
            key,
            MemoryRecord {
                estimated_size,
                last_access_time: now,
                load_time: now,
                access_count: 0,
            },
        );
    }

    pub fn untrack(&mut self, key: &str) -> Option<MemoryRecord> {
        self.records.remove(key)
    }

    /// Record an access to a tracked resource.
    pub fn touch(&mut self, key: &str, now: Instant) -> bool {
        match self.records.get_mut(key) {
            Some(record) => {
                record.last_access_time = now;
                record.access_count += 1;
                true
            }
            None => false,
        }
    }

    /// Keys to evict, oldest access first.
    ///
    /// A record qualifies when it has been idle longer than the unused
    /// lifetime (halved under `Critical` pressure), or when more records
    /// exist than `max_resident_assets`, in which case the excess is taken
    /// from the least accessed, earliest loaded records.
    pub fn recommend_eviction_candidates(&self, now: Instant) -> Vec<ResourceKey> {
        let lifetime = if self.level == PressureLevel::Critical {
            self.config.unused_lifetime / 2
        } else {
            self.config.unused_lifetime
        };

        let mut candidates: Vec<(&ResourceKey, &MemoryRecord)> = self
            .records
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.last_access_time) > lifetime)
            .collect();

        let excess = self
            .records
            .len()
            .saturating_sub(self.config.max_resident_assets);
        if excess > 0 {
            let mut by_use: Vec<(&ResourceKey, &MemoryRecord)> = self.records.iter().collect();
            by_use.sort_by(|(_, a), (_, b)| {
                a.access_count
                    .cmp(&b.access_count)
                    .then(a.load_time.cmp(&b.load_time))
            });
            for entry in by_use.into_iter().take(excess) {
                if !candidates.iter().any(|(k, _)| *k == entry.0) {
                    candidates.push(entry);
                }
            }
        }

        candidates.sort_by(|(ka, a), (kb, b)| {
            a.last_access_time
                .cmp(&b.last_access_time)
                .then_with(|| ka.cmp(kb))
        });
        candidates.into_iter().map(|(k, _)| k.clone()).collect()
    }

    /// Evict up to `max_to_evict` candidates by queueing their unloads.
    /// Returns the evicted keys.
    pub fn cleanup(
        &mut self,
        now: Instant,
        max_to_evict: usize,
        queue: &mut QueueManager,
        registry: &AssetRegistry,
    ) -> Vec<ResourceKey> {
        let mut evicted = Vec::new();
        for key in self.recommend_eviction_candidates(now) {
            if evicted.len() >= max_to_evict {
                break;
            }
            if registry.state_of(key.as_str()) != Some(ResourceState::Loaded) {
                // Out of sync with the registry, nothing left to unload.
                self.untrack(key.as_str());
                continue;
            }
            if !queue.enqueue_unload(key.clone()) {
                continue;
            }
            self.untrack(key.as_str());
            tracing::debug!(key = %key, level = ?self.level, "evicting");
            evicted.push(key);
        }
        self.last_cleanup = Some(now);
        self.total_evictions += evicted.len() as u64;
        evicted
    }

    /// Run pressure sampling and cleanup when their intervals are due.
    ///
    /// Entering `Critical` runs an aggressive cleanup immediately; `High` or
    /// `Critical` pressure cleans up on every sample; otherwise cleanup runs
    /// on `cleanup_interval`.
    pub fn update(
        &mut self,
        now: Instant,
        queue: &mut QueueManager,
        registry: &AssetRegistry,
        metrics: &mut MetricsCollector,
    ) -> MemoryReport {
        let mut report = MemoryReport {
            level: self.level,
            ..MemoryReport::default()
        };

        if is_due(self.last_sample, self.config.pressure_check_interval, now) {
            let previous = self.level;
            let level = self.sample_pressure();
            self.last_sample = Some(now);
            report.sampled = true;
            report.level = level;

            if level == PressureLevel::Critical && previous != PressureLevel::Critical {
                tracing::warn!(
                    bytes = self.current_bytes,
                    "critical memory pressure, aggressive cleanup"
                );
                report.escalated = true;
                report.evicted = self.cleanup(now, self.config.aggressive_evictions, queue, registry);
            } else if level >= PressureLevel::High {
                report.evicted =
                    self.cleanup(now, self.config.max_evictions_per_cleanup, queue, registry);
            }
        }

        if !report.sampled || report.level < PressureLevel::High {
            if is_due(self.last_cleanup, self.config.cleanup_interval, now) {
                report.evicted =
                    self.cleanup(now, self.config.max_evictions_per_cleanup, queue, registry);
            }
        }

        metrics.record_memory(self.current_bytes);
        metrics.record_evictions(report.evicted.len());
        report
    }

    pub fn level(&self) -> PressureLevel {
        self.level
    }

    pub fn record(&self, key: &str) -> Option<&MemoryRecord> {
        self.records.get(key)
    }

    pub fn is_tracked(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn tracked_count(&self) -> usize {
        self.records.len()
    }

    /// Sum of estimated sizes of tracked resources.
    pub fn tracked_bytes(&self) -> u64 {
        self.records.values().map(|r| r.estimated_size).sum()
    }

    pub fn current_bytes(&self) -> u64 {
        self.current_bytes
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak_bytes
    }

    pub fn total_evictions(&self) -> u64 {
        self.total_evictions
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }
}

fn is_due(last: Option<Instant>, interval: std::time::Duration, now: Instant) -> bool {
    last.is_none_or(|t| now.saturating_duration_since(t) >= interval)
}
