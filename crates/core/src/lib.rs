//! Asset streaming: registry, priority scoring, bounded load queue, memory
//! eviction, metrics and the coordinator that drives them per cycle.
//!
//! # Invariants
//! - A resource holds a handle if and only if it is `Loaded`.
//! - After a cycle, nothing beyond `unload_radius` is `Loaded`.
//! - In-flight loads never exceed `max_concurrent_loads`.
//! - At most one load or unload is in flight per key.
//!
//! Cycles are synchronous and single-threaded. Loader futures are polled
//! once per cycle with a no-op waker; dropping one cancels it. A resource is
//! `Unloaded` from the moment its unload starts.

mod config;
mod coordinator;
mod error;
mod loader;
mod memory;
mod metrics;
mod priority;
mod queue;
mod registry;
mod resource;

#[cfg(test)]
mod test_support;

pub use config::{MemoryConfig, MetricsConfig, QueueConfig, StreamConfig};
pub use coordinator::{StreamingCoordinator, StreamingSnapshot};
pub use error::{ConfigError, LoadError, LoadFailure, RegistryError};
pub use loader::AssetLoader;
pub use memory::{
    MemoryGauge, MemoryManager, MemoryProbe, MemoryRecord, MemoryReport, PressureLevel,
    ProcessMemoryProbe,
};
pub use metrics::{
    CycleTimer, Gauges, MetricsCollector, MetricsSnapshot, MetricsSummary, OperationStats,
    SnapshotRing,
};
pub use priority::{PriorityCalculator, distance_multiplier, inactivity_threshold};
pub use queue::{Completion, LoadRequest, ProcessReport, QueueManager};
pub use registry::{AssetRegistry, Registration, StateCounts};
pub use resource::{ResourceHandle, ResourceState, StreamableResource};

pub fn crate_info() -> &'static str {
    "assetstream-core v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("assetstream"));
    }
}
