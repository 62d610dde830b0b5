use std::sync::Arc;
use std::time::{Duration, Instant};

use assetstream_common::{Clock, Priority, ResourceKey, Vec3};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::config::StreamConfig;
use crate::error::{ConfigError, RegistryError};
use crate::loader::AssetLoader;
use crate::memory::{MemoryManager, MemoryProbe, PressureLevel};
use crate::metrics::{Gauges, MetricsCollector, MetricsSummary};
use crate::priority::PriorityCalculator;
use crate::queue::{ProcessReport, QueueManager};
use crate::registry::AssetRegistry;
use crate::resource::{ResourceHandle, ResourceState, StreamableResource};

/// Aggregate state published at the end of every coordination cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingSnapshot {
    pub cycle: u64,
    pub viewpoint: Vec3,
    pub registered: usize,
    pub unloaded: usize,
    pub queued: usize,
    pub loading: usize,
    pub loaded: usize,
    pub failed: usize,
    pub queued_loads: usize,
    pub queued_unloads: usize,
    pub active_loads: usize,
    pub active_unloads: usize,
    pub pressure: PressureLevel,
    pub memory_bytes: u64,
    pub tracked_bytes: u64,
    pub peak_memory_bytes: u64,
    /// Operations started and evictions queued during this cycle.
    pub loads_started: usize,
    pub unloads_started: usize,
    pub evicted: usize,
    pub cycle_time_ms: f64,
    pub metrics: MetricsSummary,
}

enum Intent {
    Load(Priority),
    Unload,
    Cancel,
}

/// Drives one coordination cycle per call to [`Self::run_cycle`].
///
/// Owns the registry, queue, memory manager and metrics collector; nothing
/// else mutates them. Cycles are synchronous: loader futures are polled by
/// the queue manager and never block a cycle.
pub struct StreamingCoordinator {
    config: StreamConfig,
    registry: AssetRegistry,
    calculator: PriorityCalculator,
    queue: QueueManager,
    memory: MemoryManager,
    metrics: MetricsCollector,
    clock: Arc<dyn Clock>,
    subscribers: Vec<Sender<StreamingSnapshot>>,
    cycle: u64,
    last_snapshot: Option<StreamingSnapshot>,
}

impl StreamingCoordinator {
    /// Validate `config` and build every component from it.
    pub fn new(
        config: StreamConfig,
        loader: Arc<dyn AssetLoader>,
        probe: Box<dyn MemoryProbe>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let calculator = PriorityCalculator::new(&config)?;
        let queue = QueueManager::new(config.queue.clone(), loader)?;
        let memory = MemoryManager::new(config.memory.clone(), probe)?;
        let metrics = MetricsCollector::new(config.metrics.clone(), clock.now())?;
        let registry = AssetRegistry::new(config.max_resources);
        Ok(Self::from_parts(
            config, registry, calculator, queue, memory, metrics, clock,
        ))
    }

    /// Assemble a coordinator from components built by the caller.
    pub fn from_parts(
        config: StreamConfig,
        registry: AssetRegistry,
        calculator: PriorityCalculator,
        queue: QueueManager,
        memory: MemoryManager,
        metrics: MetricsCollector,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            registry,
            calculator,
            queue,
            memory,
            metrics,
            clock,
            subscribers: Vec::new(),
            cycle: 0,
            last_snapshot: None,
        }
    }

    /// Register a resource or refresh an existing one. Returns false when
    /// the key is empty or the registry is full.
    pub fn register<I, S>(
        &mut self,
        key: impl Into<ResourceKey>,
        position: Vec3,
        priority: Priority,
        tags: I,
    ) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = self.clock.now();
        match self
            .registry
            .register(key.into(), position, priority, tags, now)
        {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(%err, "registration rejected");
                false
            }
        }
    }

    /// Remove a resource. In-flight loads are aborted and loaded payloads
    /// are handed back to the loader.
    pub fn unregister(&mut self, key: &str) -> bool {
        let Some(state) = self.registry.state_of(key) else {
            return false;
        };
        match state {
            ResourceState::Queued | ResourceState::Loading => {
                if self.queue.cancel_load(key) {
                    self.metrics.record_load_cancelled();
                }
            }
            ResourceState::Loaded => {
                self.queue.cancel_unload(key);
                if !self.queue.is_unloading(key) {
                    self.queue.release(&ResourceKey::from(key));
                }
            }
            ResourceState::Unloaded | ResourceState::Failed => {}
        }
        self.memory.untrack(key);
        self.registry.unregister(key);
        tracing::debug!(key, ?state, "unregistered resource");
        true
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.registry.get(key).is_some_and(StreamableResource::is_loaded)
    }

    /// Handle of a loaded resource. Counts as an access.
    pub fn get_loaded(&mut self, key: &str) -> Option<ResourceHandle> {
        let handle = self.registry.get(key)?.handle()?.clone();
        let now = self.clock.now();
        self.registry.touch(key, now);
        self.memory.touch(key, now);
        Some(handle)
    }

    /// Raise a resource to `Critical` and put it at the head of the load
    /// queue. Returns true when the resource is loaded, loading or queued
    /// afterwards.
    pub fn force_load(&mut self, key: &str) -> bool {
        let now = self.clock.now();
        let state = match self.elevate(key) {
            Ok(state) => state,
            Err(err) => {
                tracing::debug!(key, %err, "force load ignored");
                return false;
            }
        };

        match state {
            ResourceState::Loaded => {
                self.queue.cancel_unload(key);
                !self.queue.is_unloading(key)
            }
            ResourceState::Loading => true,
            ResourceState::Queued => {
                self.queue.cancel_load(key);
                if self
                    .queue
                    .enqueue_load(key.into(), Priority::Critical, now)
                {
                    true
                } else {
                    self.revert_to_unloaded(key);
                    false
                }
            }
            ResourceState::Unloaded | ResourceState::Failed => self.submit_load(
                ResourceKey::from(key),
                Priority::Critical,
                now,
            ),
        }
    }

    fn elevate(&mut self, key: &str) -> Result<ResourceState, RegistryError> {
        self.registry.set_base_priority(key, Priority::Critical)?;
        self.registry.set_effective_priority(key, Priority::Critical)?;
        self.registry
            .state_of(key)
            .ok_or_else(|| RegistryError::NotFound(key.into()))
    }

    /// Run one coordination cycle at `now` with the viewer at `viewpoint`.
    /// Returns `None` while streaming is disabled.
    pub fn run_cycle(&mut self, now: Instant, viewpoint: Vec3) -> Option<StreamingSnapshot> {
        if !self.config.enabled {
            return None;
        }
        self.cycle += 1;
        let _span = tracing::info_span!("stream_cycle", cycle = self.cycle).entered();
        let cycle_start = Instant::now();

        let calculator = &self.calculator;
        self.registry.refresh(|resource| {
            let distance = viewpoint.distance(resource.position());
            (
                distance,
                calculator.effective_priority(resource, distance, now),
            )
        });

        for (key, intent) in self.decide(now) {
            match intent {
                Intent::Load(priority) => {
                    self.submit_load(key, priority, now);
                }
                Intent::Unload => {
                    if self.queue.enqueue_unload(key.clone()) {
                        tracing::debug!(key = %key, "queued unload");
                    }
                }
                Intent::Cancel => self.abandon_load(&key),
            }
        }

        let mut report =
            self.queue
                .process(now, &mut self.registry, &mut self.memory, &mut self.metrics);
        let memory = self
            .memory
            .update(now, &mut self.queue, &self.registry, &mut self.metrics);
        if !memory.evicted.is_empty() {
            // Start the eviction unloads in this cycle.
            let followup =
                self.queue
                    .process(now, &mut self.registry, &mut self.memory, &mut self.metrics);
            merge(&mut report, followup);
        }

        let counts = self.registry.counts();
        self.metrics.set_gauges(Gauges {
            registered: self.registry.len(),
            loaded: counts.loaded,
            loading: counts.loading,
            queued_loads: self.queue.queued_load_count(),
            queued_unloads: self.queue.queued_unload_count(),
            active_loads: self.queue.active_load_count(),
            failed: counts.failed,
        });
        let cycle_time = cycle_start.elapsed();
        self.metrics.record_cycle(cycle_time);
        self.metrics.roll_up(now);

        let snapshot = StreamingSnapshot {
            cycle: self.cycle,
            viewpoint,
            registered: self.registry.len(),
            unloaded: counts.unloaded,
            queued: counts.queued,
            loading: counts.loading,
            loaded: counts.loaded,
            failed: counts.failed,
            queued_loads: self.queue.queued_load_count(),
            queued_unloads: self.queue.queued_unload_count(),
            active_loads: self.queue.active_load_count(),
            active_unloads: self.queue.active_unload_count(),
            pressure: memory.level,
            memory_bytes: self.memory.current_bytes(),
            tracked_bytes: self.memory.tracked_bytes(),
            peak_memory_bytes: self.memory.peak_bytes(),
            loads_started: report.loads_started,
            unloads_started: report.unloads_started,
            evicted: memory.evicted.len(),
            cycle_time_ms: cycle_time.as_secs_f64() * 1000.0,
            metrics: self.metrics.summary(),
        };
        tracing::trace!(
            loaded = snapshot.loaded,
            loading = snapshot.loading,
            queued = snapshot.queued_loads,
            pressure = ?snapshot.pressure,
            "cycle complete"
        );

        self.subscribers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
        self.last_snapshot = Some(snapshot.clone());
        Some(snapshot)
    }

    /// [`Self::run_cycle`] at the clock's current time.
    pub fn tick(&mut self, viewpoint: Vec3) -> Option<StreamingSnapshot> {
        let now = self.clock.now();
        self.run_cycle(now, viewpoint)
    }

    fn decide(&self, now: Instant) -> Vec<(ResourceKey, Intent)> {
        let calculator = &self.calculator;
        self.registry
            .list_all()
            .filter_map(|resource| {
                let distance = resource.distance_from_viewpoint();
                let priority = resource.effective_priority();
                let intent = match resource.state() {
                    ResourceState::Unloaded if calculator.should_load(distance, priority) => {
                        Intent::Load(priority)
                    }
                    ResourceState::Loaded
                        if !calculator.should_load(distance, priority)
                            || calculator.should_unload(resource, distance, now) =>
                    {
                        Intent::Unload
                    }
                    ResourceState::Queued | ResourceState::Loading
                        if distance > calculator.unload_radius() =>
                    {
                        Intent::Cancel
                    }
                    _ => return None,
                };
                Some((resource.key().clone(), intent))
            })
            .collect()
    }

    fn submit_load(&mut self, key: ResourceKey, priority: Priority, now: Instant) -> bool {
        if !self.queue.enqueue_load(key.clone(), priority, now) {
            return false;
        }
        match self
            .registry
            .transition_state(key.as_str(), ResourceState::Queued)
        {
            Ok(_) => {
                tracing::debug!(key = %key, ?priority, "queued load");
                true
            }
            Err(err) => {
                tracing::warn!(key = %key, %err, "could not queue load");
                self.queue.cancel_load(key.as_str());
                false
            }
        }
    }

    fn abandon_load(&mut self, key: &ResourceKey) {
        if self.queue.cancel_load(key.as_str()) {
            self.metrics.record_load_cancelled();
        }
        self.revert_to_unloaded(key.as_str());
        tracing::debug!(key = %key, "cancelled load beyond unload radius");
    }

    fn revert_to_unloaded(&mut self, key: &str) {
        if let Err(err) = self
            .registry
            .transition_state(key, ResourceState::Unloaded)
        {
            tracing::warn!(key, %err, "could not revert resource");
        }
    }

    /// Observe every snapshot published from now on. Dropped receivers are
    /// pruned on the next publish.
    pub fn subscribe(&mut self) -> Receiver<StreamingSnapshot> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Abort queued and in-flight loads, hand every loaded payload back to
    /// the loader and disable further cycles.
    pub fn shutdown(&mut self) {
        let cancelled = self.queue.cancel_all();
        for _ in &cancelled {
            self.metrics.record_load_cancelled();
        }
        for key in self.registry.keys() {
            match self.registry.state_of(key.as_str()) {
                Some(ResourceState::Loaded) => {
                    if !self.queue.is_unloading(key.as_str()) {
                        self.queue.release(&key);
                    }
                    self.revert_to_unloaded(key.as_str());
                }
                Some(ResourceState::Queued | ResourceState::Loading) => {
                    self.revert_to_unloaded(key.as_str());
                }
                _ => {}
            }
        }
        self.memory.clear();
        self.config.enabled = false;
        tracing::info!(cancelled = cancelled.len(), "streaming shut down");
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn set_streaming_radius(&mut self, radius: f32) -> Result<(), ConfigError> {
        self.update_radii(|config| config.streaming_radius = radius)
    }

    pub fn set_unload_radius(&mut self, radius: f32) -> Result<(), ConfigError> {
        self.update_radii(|config| config.unload_radius = radius)
    }

    fn update_radii(&mut self, edit: impl FnOnce(&mut StreamConfig)) -> Result<(), ConfigError> {
        let mut config = self.config.clone();
        edit(&mut config);
        self.calculator = PriorityCalculator::new(&config)?;
        self.config = config;
        Ok(())
    }

    pub fn set_max_concurrent_loads(&mut self, max: usize) -> Result<(), ConfigError> {
        self.queue.set_max_concurrent_loads(max)?;
        self.config.queue.max_concurrent_loads = max;
        Ok(())
    }

    pub fn set_memory_thresholds(&mut self, high: u64, critical: u64) -> Result<(), ConfigError> {
        self.memory.set_thresholds(high, critical)?;
        self.config.memory.high_threshold_bytes = high;
        self.config.memory.critical_threshold_bytes = critical;
        Ok(())
    }

    pub fn set_cleanup_interval(&mut self, interval: Duration) -> Result<(), ConfigError> {
        self.memory.set_cleanup_interval(interval)?;
        self.config.memory.cleanup_interval = interval;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&StreamableResource> {
        self.registry.get(key)
    }

    pub fn list_by_tag(&self, tag: &str) -> Vec<&StreamableResource> {
        self.registry.list_by_tag(tag)
    }

    pub fn list_within_distance(&self, max: f32) -> Vec<&StreamableResource> {
        self.registry.list_within_distance(max)
    }

    pub fn stats(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    pub fn last_snapshot(&self) -> Option<&StreamingSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn calculator(&self) -> &PriorityCalculator {
        &self.calculator
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }
}

fn merge(report: &mut ProcessReport, other: ProcessReport) {
    report.loads_started += other.loads_started;
    report.unloads_started += other.unloads_started;
    report.stale_dropped += other.stale_dropped;
    report.completions.extend(other.completions);
}
