use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const MIB: u64 = 1024 * 1024;

/// Streaming configuration: radii, capacity and the per-component settings.
///
/// Pure in-memory configuration. The serde derives exist so drivers can
/// read it from their own scenario files; the engine never persists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// When false, coordination cycles are no-ops.
    pub enabled: bool,
    /// Base load distance for `Medium` priority resources.
    pub streaming_radius: f32,
    /// Hard cut-off: nothing beyond this distance is kept loaded.
    pub unload_radius: f32,
    /// Resources closer than this are raised one priority step.
    pub high_priority_radius: f32,
    /// Resources at or beyond this distance are lowered one priority step.
    pub low_priority_radius: f32,
    /// Maximum number of registered resources.
    pub max_resources: usize,
    pub queue: QueueConfig,
    pub memory: MemoryConfig,
    pub metrics: MetricsConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            streaming_radius: 100.0,
            unload_radius: 150.0,
            high_priority_radius: 25.0,
            low_priority_radius: 100.0,
            max_resources: 1000,
            queue: QueueConfig::default(),
            memory: MemoryConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_radii()?;
        if self.max_resources == 0 {
            return Err(ConfigError::Zero("max_resources"));
        }
        self.queue.validate()?;
        self.memory.validate()?;
        self.metrics.validate()
    }

    /// Checks only the distance settings used by the priority calculator.
    pub fn validate_radii(&self) -> Result<(), ConfigError> {
        positive("streaming_radius", self.streaming_radius)?;
        positive("unload_radius", self.unload_radius)?;
        positive("high_priority_radius", self.high_priority_radius)?;
        positive("low_priority_radius", self.low_priority_radius)?;
        if self.unload_radius < self.streaming_radius {
            return Err(ConfigError::UnloadInsideStreaming {
                streaming: self.streaming_radius,
                unload: self.unload_radius,
            });
        }
        if self.high_priority_radius >= self.low_priority_radius {
            return Err(ConfigError::PriorityRadiiInverted {
                high: self.high_priority_radius,
                low: self.low_priority_radius,
            });
        }
        Ok(())
    }
}

/// Load/unload queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Hard cap on simultaneously in-flight loads. Unloads are not capped.
    pub max_concurrent_loads: usize,
    /// Maximum number of pending load requests.
    pub max_queue_size: usize,
    #[serde(with = "duration_secs")]
    pub load_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub unload_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 4,
            max_queue_size: 256,
            load_timeout: Duration::from_secs(30),
            unload_timeout: Duration::from_secs(10),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_loads == 0 {
            return Err(ConfigError::Zero("max_concurrent_loads"));
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::Zero("max_queue_size"));
        }
        if self.load_timeout.is_zero() {
            return Err(ConfigError::Zero("load_timeout"));
        }
        if self.unload_timeout.is_zero() {
            return Err(ConfigError::Zero("unload_timeout"));
        }
        Ok(())
    }
}

/// Memory pressure thresholds and eviction policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Usage at or above this is `High` pressure. `Medium` starts at 70% of it.
    pub high_threshold_bytes: u64,
    /// Usage at or above this is `Critical` pressure.
    pub critical_threshold_bytes: u64,
    /// Resident asset count above which the least used entries are evicted.
    pub max_resident_assets: usize,
    /// Loaded assets untouched for longer than this become eviction candidates.
    #[serde(with = "duration_secs")]
    pub unused_lifetime: Duration,
    #[serde(with = "duration_secs")]
    pub pressure_check_interval: Duration,
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
    pub max_evictions_per_cleanup: usize,
    /// Eviction budget for the pass triggered on entering `Critical`.
    pub aggressive_evictions: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            high_threshold_bytes: 512 * MIB,
            critical_threshold_bytes: 768 * MIB,
            max_resident_assets: 200,
            unused_lifetime: Duration::from_secs(120),
            pressure_check_interval: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(10),
            max_evictions_per_cleanup: 8,
            aggressive_evictions: 32,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.high_threshold_bytes == 0 {
            return Err(ConfigError::Zero("high_threshold_bytes"));
        }
        if self.critical_threshold_bytes <= self.high_threshold_bytes {
            return Err(ConfigError::MemoryThresholdsInverted {
                high: self.high_threshold_bytes,
                critical: self.critical_threshold_bytes,
            });
        }
        if self.max_resident_assets == 0 {
            return Err(ConfigError::Zero("max_resident_assets"));
        }
        if self.unused_lifetime.is_zero() {
            return Err(ConfigError::Zero("unused_lifetime"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::Zero("cleanup_interval"));
        }
        Ok(())
    }

    /// Derived medium threshold: 70% of the high threshold.
    pub fn medium_threshold_bytes(&self) -> u64 {
        self.high_threshold_bytes / 10 * 7
    }
}

/// Metrics history settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Number of periodic snapshots retained.
    pub history_capacity: usize,
    #[serde(with = "duration_secs")]
    pub snapshot_interval: Duration,
    /// Number of newest snapshots used for throughput figures.
    pub throughput_window: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            history_capacity: 60,
            snapshot_interval: Duration::from_secs(1),
            throughput_window: 10,
        }
    }
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::Zero("history_capacity"));
        }
        if self.throughput_window < 2 {
            return Err(ConfigError::TooSmall {
                name: "throughput_window",
                min: 2,
            });
        }
        Ok(())
    }
}

fn positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    // NaN fails this comparison too.
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive {
            name,
            value: value as f64,
        })
    }
}

/// Durations as fractional seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = StreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.streaming_radius, 100.0);
        assert_eq!(config.unload_radius, 150.0);
        assert_eq!(config.queue.max_concurrent_loads, 4);
    }

    #[test]
    fn rejects_non_positive_radius() {
        let config = StreamConfig {
            streaming_radius: 0.0,
            ..StreamConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive {
                name: "streaming_radius",
                ..
            })
        ));

        let config = StreamConfig {
            unload_radius: -5.0,
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_nan_radius() {
        let config = StreamConfig {
            high_priority_radius: f32::NAN,
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unload_inside_streaming() {
        let config = StreamConfig {
            streaming_radius: 200.0,
            unload_radius: 150.0,
            low_priority_radius: 250.0,
            ..StreamConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnloadInsideStreaming {
                streaming: 200.0,
                unload: 150.0
            })
        );
    }

    #[test]
    fn rejects_inverted_priority_radii() {
        let config = StreamConfig {
            high_priority_radius: 100.0,
            low_priority_radius: 50.0,
            ..StreamConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PriorityRadiiInverted { .. })
        ));
    }

    #[test]
    fn rejects_zero_concurrency_and_inverted_memory() {
        let mut config = StreamConfig::default();
        config.queue.max_concurrent_loads = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero("max_concurrent_loads"))
        );

        let mut config = StreamConfig::default();
        config.memory.critical_threshold_bytes = config.memory.high_threshold_bytes;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MemoryThresholdsInverted { .. })
        ));
    }

    #[test]
    fn medium_threshold_is_seventy_percent_of_high() {
        let memory = MemoryConfig {
            high_threshold_bytes: 1000,
            critical_threshold_bytes: 2000,
            ..MemoryConfig::default()
        };
        assert_eq!(memory.medium_threshold_bytes(), 700);
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(QueueConfig::default()).unwrap();
        assert_eq!(json["load_timeout"], 30.0);

        let parsed: QueueConfig =
            serde_json::from_str(r#"{"max_concurrent_loads": 2, "load_timeout": 0.5}"#).unwrap();
        assert_eq!(parsed.max_concurrent_loads, 2);
        assert_eq!(parsed.load_timeout, Duration::from_millis(500));
        assert_eq!(parsed.max_queue_size, 256);
    }
}
