use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use assetstream_common::{Priority, ResourceKey};
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::config::QueueConfig;
use crate::error::{ConfigError, LoadError, LoadFailure};
use crate::loader::AssetLoader;
use crate::memory::MemoryManager;
use crate::metrics::MetricsCollector;
use crate::registry::AssetRegistry;
use crate::resource::{ResourceHandle, ResourceState};

/// A pending load, owned by the queue until it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub key: ResourceKey,
    pub priority: Priority,
    pub enqueue_time: Instant,
}

#[derive(Debug, Clone)]
struct UnloadRequest {
    key: ResourceKey,
}

struct InFlight<T> {
    future: BoxFuture<'static, T>,
    started_at: Instant,
}

/// Result of a finished operation, reported by [`QueueManager::process`].
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Loaded {
        key: ResourceKey,
        duration: Duration,
        size_bytes: u64,
    },
    Failed {
        key: ResourceKey,
        duration: Duration,
        failure: LoadFailure,
    },
    Unloaded {
        key: ResourceKey,
        duration: Duration,
        timed_out: bool,
    },
}

impl Completion {
    pub fn key(&self) -> &ResourceKey {
        match self {
            Completion::Loaded { key, .. }
            | Completion::Failed { key, .. }
            | Completion::Unloaded { key, .. } => key,
        }
    }
}

/// What one `process` call did.
#[derive(Debug, Default)]
pub struct ProcessReport {
    pub loads_started: usize,
    pub unloads_started: usize,
    /// Requests dropped because their resource was no longer in the
    /// expected state when they reached the head of the queue.
    pub stale_dropped: usize,
    pub completions: Vec<Completion>,
}

/// Priority-ordered load queue, FIFO unload queue and the in-flight
/// operations started from them.
///
/// Loads are capped at `max_concurrent_loads`; unloads are not. At most one
/// operation per key exists at any time.
pub struct QueueManager {
    config: QueueConfig,
    loader: Arc<dyn AssetLoader>,
    load_queue: VecDeque<LoadRequest>,
    unload_queue: VecDeque<UnloadRequest>,
    active_loads: BTreeMap<ResourceKey, InFlight<Result<ResourceHandle, LoadError>>>,
    active_unloads: BTreeMap<ResourceKey, InFlight<()>>,
    /// Unload notifications for resources that are no longer registered.
    detached: Vec<BoxFuture<'static, ()>>,
}

impl QueueManager {
    pub fn new(config: QueueConfig, loader: Arc<dyn AssetLoader>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            loader,
            load_queue: VecDeque::new(),
            unload_queue: VecDeque::new(),
            active_loads: BTreeMap::new(),
            active_unloads: BTreeMap::new(),
            detached: Vec::new(),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Change the load cap. Rejected below the number of loads already in
    /// flight.
    pub fn set_max_concurrent_loads(&mut self, max: usize) -> Result<(), ConfigError> {
        if max == 0 {
            return Err(ConfigError::Zero("max_concurrent_loads"));
        }
        if max < self.active_loads.len() {
            return Err(ConfigError::TooSmall {
                name: "max_concurrent_loads",
                min: self.active_loads.len(),
            });
        }
        self.config.max_concurrent_loads = max;
        Ok(())
    }

    /// Queue a load. Rejected when the key already has a pending or
    /// in-flight operation, or when the queue is full. `Critical` requests
    /// jump to the head; others go behind every request of equal or higher
    /// priority.
    pub fn enqueue_load(&mut self, key: ResourceKey, priority: Priority, now: Instant) -> bool {
        if self.is_queued(key.as_str()) || self.active_loads.contains_key(&key) {
            tracing::trace!(key = %key, "load already pending");
            return false;
        }
        if self.has_unload(key.as_str()) {
            tracing::trace!(key = %key, "load rejected while unloading");
            return false;
        }
        if self.load_queue.len() >= self.config.max_queue_size {
            tracing::warn!(
                key = %key,
                max = self.config.max_queue_size,
                "load queue full, request rejected"
            );
            return false;
        }

        let request = LoadRequest {
            key,
            priority,
            enqueue_time: now,
        };
        if priority == Priority::Critical {
            self.load_queue.push_front(request);
        } else {
            let at = self
                .load_queue
                .iter()
                .position(|queued| queued.priority < priority)
                .unwrap_or(self.load_queue.len());
            self.load_queue.insert(at, request);
        }
        true
    }

    /// Queue an unload after cancelling any load for the same key.
    /// Rejected when an unload for the key is already pending.
    pub fn enqueue_unload(&mut self, key: ResourceKey) -> bool {
        self.cancel_load(key.as_str());
        if self.has_unload(key.as_str()) {
            return false;
        }
        self.unload_queue.push_back(UnloadRequest { key });
        true
    }

    /// Drop a queued load or abort an in-flight one, releasing its slot.
    pub fn cancel_load(&mut self, key: &str) -> bool {
        if let Some(at) = self.load_queue.iter().position(|r| r.key.as_str() == key) {
            self.load_queue.remove(at);
            tracing::debug!(key, "cancelled queued load");
            return true;
        }
        if self.active_loads.remove(key).is_some() {
            tracing::debug!(key, "aborted in-flight load");
            return true;
        }
        false
    }

    /// Drop a queued (not yet started) unload.
    pub fn cancel_unload(&mut self, key: &str) -> bool {
        match self.unload_queue.iter().position(|r| r.key.as_str() == key) {
            Some(at) => {
                self.unload_queue.remove(at);
                true
            }
            None => false,
        }
    }

    /// Notify the loader that an unregistered resource's payload is gone.
    /// The unload future keeps being polled but changes no state.
    pub fn release(&mut self, key: &ResourceKey) {
        let mut future = self.loader.unload(key);
        if poll_once(&mut future).is_pending() {
            self.detached.push(future);
        }
    }

    /// Drop every queued request and abort every in-flight load. In-flight
    /// unloads keep running. Returns the keys whose loads were dropped.
    pub fn cancel_all(&mut self) -> Vec<ResourceKey> {
        let mut cancelled: Vec<ResourceKey> = self.load_queue.drain(..).map(|r| r.key).collect();
        cancelled.extend(std::mem::take(&mut self.active_loads).into_keys());
        self.unload_queue.clear();
        cancelled
    }

    /// Run one scheduling step: reap finished or timed-out operations, then
    /// start unloads and as many loads as the concurrency cap allows.
    pub fn process(
        &mut self,
        now: Instant,
        registry: &mut AssetRegistry,
        memory: &mut MemoryManager,
        metrics: &mut MetricsCollector,
    ) -> ProcessReport {
        let mut report = ProcessReport::default();

        self.reap_loads(now, registry, memory, metrics, &mut report);
        self.reap_unloads(now, metrics, &mut report);
        self.detached
            .retain_mut(|future| poll_once(future).is_pending());

        self.start_unloads(now, registry, memory, metrics, &mut report);
        self.start_loads(now, registry, memory, metrics, &mut report);

        report
    }

    fn reap_loads(
        &mut self,
        now: Instant,
        registry: &mut AssetRegistry,
        memory: &mut MemoryManager,
        metrics: &mut MetricsCollector,
        report: &mut ProcessReport,
    ) {
        let timeout = self.config.load_timeout;
        let mut finished = Vec::new();
        for (key, op) in self.active_loads.iter_mut() {
            let elapsed = now.saturating_duration_since(op.started_at);
            match poll_once(&mut op.future) {
                Poll::Ready(result) => {
                    finished.push((key.clone(), elapsed, result.map_err(LoadFailure::from)));
                }
                Poll::Pending if elapsed >= timeout => {
                    finished.push((key.clone(), elapsed, Err(LoadFailure::TimedOut(timeout))));
                }
                Poll::Pending => {}
            }
        }
        for (key, elapsed, outcome) in finished {
            self.active_loads.remove(&key);
            let completion = finish_load(key, elapsed, outcome, now, registry, memory, metrics);
            report.completions.push(completion);
        }
    }

    fn reap_unloads(
        &mut self,
        now: Instant,
        metrics: &mut MetricsCollector,
        report: &mut ProcessReport,
    ) {
        let timeout = self.config.unload_timeout;
        let mut finished = Vec::new();
        for (key, op) in self.active_unloads.iter_mut() {
            let elapsed = now.saturating_duration_since(op.started_at);
            match poll_once(&mut op.future) {
                Poll::Ready(()) => finished.push((key.clone(), elapsed, false)),
                Poll::Pending if elapsed >= timeout => finished.push((key.clone(), elapsed, true)),
                Poll::Pending => {}
            }
        }
        for (key, elapsed, timed_out) in finished {
            self.active_unloads.remove(&key);
            let completion = finish_unload(key, elapsed, timed_out, metrics);
            report.completions.push(completion);
        }
    }

    fn start_unloads(
        &mut self,
        now: Instant,
        registry: &mut AssetRegistry,
        memory: &mut MemoryManager,
        metrics: &mut MetricsCollector,
        report: &mut ProcessReport,
    ) {
        while let Some(request) = self.unload_queue.pop_front() {
            if registry.state_of(request.key.as_str()) != Some(ResourceState::Loaded) {
                report.stale_dropped += 1;
                continue;
            }
            // The payload is released as the unload starts; the loader's
            // future only reports when its side is done.
            if let Err(err) = registry.transition_state(request.key.as_str(), ResourceState::Unloaded)
            {
                tracing::warn!(key = %request.key, %err, "could not release payload");
                report.stale_dropped += 1;
                continue;
            }
            memory.untrack(request.key.as_str());
            tracing::debug!(key = %request.key, "starting unload");
            metrics.record_unload_started();
            report.unloads_started += 1;

            let mut future = self.loader.unload(&request.key);
            match poll_once(&mut future) {
                Poll::Ready(()) => {
                    let completion = finish_unload(request.key, Duration::ZERO, false, metrics);
                    report.completions.push(completion);
                }
                Poll::Pending => {
                    self.active_unloads.insert(
                        request.key,
                        InFlight {
                            future,
                            started_at: now,
                        },
                    );
                }
            }
        }
    }

    fn start_loads(
        &mut self,
        now: Instant,
        registry: &mut AssetRegistry,
        memory: &mut MemoryManager,
        metrics: &mut MetricsCollector,
        report: &mut ProcessReport,
    ) {
        while self.active_loads.len() < self.config.max_concurrent_loads {
            let Some(request) = self.load_queue.pop_front() else {
                break;
            };
            if registry
                .transition_state(request.key.as_str(), ResourceState::Loading)
                .is_err()
            {
                report.stale_dropped += 1;
                continue;
            }
            tracing::debug!(
                key = %request.key,
                priority = ?request.priority,
                waited = ?now.saturating_duration_since(request.enqueue_time),
                "starting load"
            );
            metrics.record_load_started();
            report.loads_started += 1;

            let mut future = self.loader.load(&request.key);
            match poll_once(&mut future) {
                Poll::Ready(result) => {
                    let completion = finish_load(
                        request.key,
                        Duration::ZERO,
                        result.map_err(LoadFailure::from),
                        now,
                        registry,
                        memory,
                        metrics,
                    );
                    report.completions.push(completion);
                }
                Poll::Pending => {
                    self.active_loads.insert(
                        request.key,
                        InFlight {
                            future,
                            started_at: now,
                        },
                    );
                }
            }
        }
    }

    pub fn is_queued(&self, key: &str) -> bool {
        self.load_queue.iter().any(|r| r.key.as_str() == key)
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.active_loads.contains_key(key)
    }

    pub fn is_unloading(&self, key: &str) -> bool {
        self.active_unloads.contains_key(key)
    }

    fn has_unload(&self, key: &str) -> bool {
        self.active_unloads.contains_key(key)
            || self.unload_queue.iter().any(|r| r.key.as_str() == key)
    }

    /// Pending load requests in the order they will start.
    pub fn queued_loads(&self) -> impl Iterator<Item = &LoadRequest> {
        self.load_queue.iter()
    }

    pub fn queued_load_count(&self) -> usize {
        self.load_queue.len()
    }

    pub fn queued_unload_count(&self) -> usize {
        self.unload_queue.len()
    }

    pub fn active_load_count(&self) -> usize {
        self.active_loads.len()
    }

    pub fn active_unload_count(&self) -> usize {
        self.active_unloads.len()
    }

    pub fn detached_count(&self) -> usize {
        self.detached.len()
    }

    pub fn max_concurrent_loads(&self) -> usize {
        self.config.max_concurrent_loads
    }
}

fn poll_once<T>(future: &mut BoxFuture<'static, T>) -> Poll<T> {
    let mut cx = Context::from_waker(futures::task::noop_waker_ref());
    future.poll_unpin(&mut cx)
}

fn finish_load(
    key: ResourceKey,
    duration: Duration,
    outcome: Result<ResourceHandle, LoadFailure>,
    now: Instant,
    registry: &mut AssetRegistry,
    memory: &mut MemoryManager,
    metrics: &mut MetricsCollector,
) -> Completion {
    match outcome {
        Ok(handle) => {
            let size_bytes = handle.size_bytes();
            if let Err(err) = registry.complete_load(key.as_str(), handle, now) {
                tracing::warn!(key = %key, %err, "discarding payload for vanished load");
            } else {
                memory.track(key.clone(), size_bytes, now);
            }
            metrics.record_load_success(duration);
            tracing::debug!(key = %key, ?duration, size_bytes, "loaded");
            Completion::Loaded {
                key,
                duration,
                size_bytes,
            }
        }
        Err(failure) => {
            if let Err(err) = registry.fail_load(key.as_str(), failure.to_string()) {
                tracing::warn!(key = %key, %err, "could not mark load as failed");
            }
            metrics.record_load_failure(failure.is_timeout());
            tracing::warn!(key = %key, %failure, "load failed");
            Completion::Failed {
                key,
                duration,
                failure,
            }
        }
    }
}

fn finish_unload(
    key: ResourceKey,
    duration: Duration,
    timed_out: bool,
    metrics: &mut MetricsCollector,
) -> Completion {
    metrics.record_unload(duration, !timed_out);
    if timed_out {
        tracing::warn!(key = %key, ?duration, "unload timed out");
    } else {
        tracing::debug!(key = %key, ?duration, "unloaded");
    }
    Completion::Unloaded {
        key,
        duration,
        timed_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfig, MetricsConfig};
    use crate::memory::MemoryGauge;
    use crate::test_support::{GatedLoader, InstantLoader, NeverLoader};
    use assetstream_common::Vec3;

    const NO_TAGS: [&str; 0] = [];

    struct Harness {
        queue: QueueManager,
        registry: AssetRegistry,
        memory: MemoryManager,
        metrics: MetricsCollector,
        t0: Instant,
    }

    impl Harness {
        fn new(config: QueueConfig, loader: Arc<dyn AssetLoader>) -> Self {
            let t0 = Instant::now();
            Self {
                queue: QueueManager::new(config, loader).unwrap(),
                registry: AssetRegistry::new(64),
                memory: MemoryManager::new(
                    MemoryConfig::default(),
                    Box::new(MemoryGauge::new(0)),
                )
                .unwrap(),
                metrics: MetricsCollector::new(MetricsConfig::default(), t0).unwrap(),
                t0,
            }
        }

        /// Register `key` and queue it the way the coordinator does.
        fn submit(&mut self, key: &str, priority: Priority) -> bool {
            self.registry
                .register(key.into(), Vec3::ZERO, priority, NO_TAGS, self.t0)
                .unwrap();
            let accepted = self.queue.enqueue_load(key.into(), priority, self.t0);
            if accepted {
                self.registry
                    .transition_state(key, ResourceState::Queued)
                    .unwrap();
            }
            accepted
        }

        fn process_at(&mut self, offset: Duration) -> ProcessReport {
            self.queue.process(
                self.t0 + offset,
                &mut self.registry,
                &mut self.memory,
                &mut self.metrics,
            )
        }

        fn state(&self, key: &str) -> Option<ResourceState> {
            self.registry.state_of(key)
        }
    }

    fn config(max_concurrent_loads: usize) -> QueueConfig {
        QueueConfig {
            max_concurrent_loads,
            max_queue_size: 8,
            load_timeout: Duration::from_secs(5),
            unload_timeout: Duration::from_secs(5),
        }
    }

    fn order(queue: &QueueManager) -> Vec<&str> {
        queue.queued_loads().map(|r| r.key.as_str()).collect()
    }

    #[test]
    fn critical_jumps_the_queue_and_equal_priorities_stay_fifo() {
        let mut h = Harness::new(config(1), Arc::new(InstantLoader::new(1)));
        h.submit("m1", Priority::Medium);
        h.submit("low", Priority::Low);
        h.submit("m2", Priority::Medium);
        h.submit("high", Priority::High);
        h.submit("crit", Priority::Critical);

        assert_eq!(order(&h.queue), vec!["crit", "high", "m1", "m2", "low"]);
    }

    #[test]
    fn duplicate_and_overflow_requests_are_rejected() {
        let mut h = Harness::new(
            QueueConfig {
                max_queue_size: 2,
                ..config(1)
            },
            Arc::new(NeverLoader),
        );
        assert!(h.submit("a", Priority::Medium));
        assert!(!h.queue.enqueue_load("a".into(), Priority::High, h.t0));
        assert!(h.submit("b", Priority::Medium));
        assert!(!h.submit("c", Priority::Medium));
        assert_eq!(h.queue.queued_load_count(), 2);

        h.process_at(Duration::ZERO);
        assert!(h.queue.is_loading("a"));
        // In flight: still a duplicate.
        assert!(!h.queue.enqueue_load("a".into(), Priority::Medium, h.t0));
    }

    #[test]
    fn concurrency_cap_limits_in_flight_loads() {
        let loader = Arc::new(GatedLoader::new());
        let mut h = Harness::new(config(2), loader.clone());
        for key in ["r0", "r1", "r2", "r3", "r4"] {
            assert!(h.submit(key, Priority::Medium));
        }

        let report = h.process_at(Duration::ZERO);
        assert_eq!(report.loads_started, 2);
        assert_eq!(h.queue.active_load_count(), 2);
        assert_eq!(h.state("r0"), Some(ResourceState::Loading));
        assert_eq!(h.state("r1"), Some(ResourceState::Loading));
        assert_eq!(h.state("r2"), Some(ResourceState::Queued));

        // Nothing completed: the third stays queued.
        let report = h.process_at(Duration::from_millis(10));
        assert_eq!(report.loads_started, 0);
        assert_eq!(h.queue.active_load_count(), 2);

        loader.complete("r0", 100);
        let report = h.process_at(Duration::from_millis(20));
        assert_eq!(report.loads_started, 1);
        assert_eq!(h.queue.active_load_count(), 2);
        assert_eq!(h.state("r0"), Some(ResourceState::Loaded));
        assert_eq!(h.state("r2"), Some(ResourceState::Loading));
        assert_eq!(h.state("r3"), Some(ResourceState::Queued));
        assert!(h.memory.is_tracked("r0"));
    }

    #[test]
    fn timed_out_load_fails_and_frees_slot() {
        let mut h = Harness::new(config(1), Arc::new(NeverLoader));
        h.submit("slow", Priority::Medium);
        h.submit("next", Priority::Medium);

        h.process_at(Duration::ZERO);
        assert_eq!(h.state("slow"), Some(ResourceState::Loading));

        h.process_at(Duration::from_secs(4));
        assert_eq!(h.state("slow"), Some(ResourceState::Loading));
        assert_eq!(h.metrics.loads().failures, 0);

        let report = h.process_at(Duration::from_secs(5));
        assert_eq!(h.state("slow"), Some(ResourceState::Failed));
        assert_eq!(h.metrics.loads().failures, 1);
        assert_eq!(h.metrics.loads().timeouts, 1);
        assert!(matches!(
            &report.completions[0],
            Completion::Failed { failure, .. } if failure.is_timeout()
        ));
        assert!(h.registry.get("slow").unwrap().handle().is_none());
        // The freed slot went to the next request in the same call.
        assert_eq!(h.state("next"), Some(ResourceState::Loading));
        assert_eq!(h.queue.active_load_count(), 1);
    }

    #[test]
    fn loader_error_marks_failed_without_retry() {
        let loader = Arc::new(GatedLoader::new());
        let mut h = Harness::new(config(1), loader.clone());
        h.submit("bad", Priority::Medium);
        h.process_at(Duration::ZERO);

        loader.fail("bad", "corrupt header");
        h.process_at(Duration::from_millis(5));
        assert_eq!(h.state("bad"), Some(ResourceState::Failed));
        assert!(
            h.registry
                .get("bad")
                .unwrap()
                .last_failure()
                .unwrap()
                .contains("corrupt header")
        );

        h.process_at(Duration::from_secs(60));
        assert_eq!(h.state("bad"), Some(ResourceState::Failed));
        assert_eq!(h.metrics.loads().attempts, 1);
    }

    #[test]
    fn cancel_releases_slot_and_suppresses_completion() {
        let loader = Arc::new(GatedLoader::new());
        let mut h = Harness::new(config(1), loader.clone());
        h.submit("a", Priority::Medium);
        h.submit("b", Priority::Medium);
        h.process_at(Duration::ZERO);
        assert!(h.queue.is_loading("a"));

        assert!(h.queue.cancel_load("a"));
        h.registry.unregister("a");
        loader.complete("a", 10);

        let report = h.process_at(Duration::from_millis(1));
        assert!(report.completions.iter().all(|c| c.key().as_str() != "a"));
        assert!(h.queue.is_loading("b"));
        assert!(!h.memory.is_tracked("a"));

        assert!(h.queue.cancel_load("b"));
        assert!(!h.queue.cancel_load("b"));
    }

    #[test]
    fn unload_cancels_pending_load_first() {
        let mut h = Harness::new(config(1), Arc::new(InstantLoader::new(8)));
        h.submit("a", Priority::Medium);
        assert!(h.queue.is_queued("a"));

        assert!(h.queue.enqueue_unload("a".into()));
        assert!(!h.queue.is_queued("a"));
        assert!(!h.queue.enqueue_unload("a".into()));
        assert!(!h.queue.enqueue_load("a".into(), Priority::Medium, h.t0));

        // Never loaded, so the unload is dropped as stale.
        let report = h.process_at(Duration::ZERO);
        assert_eq!(report.stale_dropped, 1);
        assert_eq!(report.unloads_started, 0);
    }

    #[test]
    fn unload_transitions_and_untracks() {
        let mut h = Harness::new(config(2), Arc::new(InstantLoader::new(32)));
        h.submit("a", Priority::Medium);
        h.process_at(Duration::ZERO);
        assert_eq!(h.state("a"), Some(ResourceState::Loaded));
        assert_eq!(h.memory.tracked_bytes(), 32);

        assert!(h.queue.enqueue_unload("a".into()));
        let report = h.process_at(Duration::from_millis(1));
        assert_eq!(report.unloads_started, 1);
        assert_eq!(h.state("a"), Some(ResourceState::Unloaded));
        assert!(h.registry.get("a").unwrap().handle().is_none());
        assert_eq!(h.memory.tracked_bytes(), 0);
        assert_eq!(h.metrics.unloads().successes, 1);
    }

    #[test]
    fn unloads_are_not_capped_by_load_concurrency() {
        let loader = Arc::new(GatedLoader::new());
        let mut h = Harness::new(config(1), loader.clone());
        for key in ["a", "b", "c"] {
            h.submit(key, Priority::Medium);
            h.process_at(Duration::ZERO);
            loader.complete(key, 1);
            h.process_at(Duration::ZERO);
        }
        assert_eq!(h.registry.loaded_count(), 3);

        for key in ["a", "b", "c"] {
            h.queue.enqueue_unload(key.into());
        }
        h.process_at(Duration::from_millis(1));
        assert_eq!(h.queue.active_unload_count(), 3);

        for key in ["a", "b", "c"] {
            loader.complete_unload(key);
        }
        h.process_at(Duration::from_millis(2));
        assert_eq!(h.queue.active_unload_count(), 0);
        assert_eq!(h.registry.loaded_count(), 0);
    }

    #[test]
    fn cap_cannot_drop_below_loads_in_flight() {
        let loader = Arc::new(GatedLoader::new());
        let mut h = Harness::new(config(4), loader.clone());
        for key in ["a", "b", "c", "d", "e"] {
            h.submit(key, Priority::Medium);
        }
        h.process_at(Duration::ZERO);
        assert_eq!(h.queue.active_load_count(), 4);

        let err = h.queue.set_max_concurrent_loads(1).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TooSmall {
                name: "max_concurrent_loads",
                min: 4
            }
        ));
        assert_eq!(h.queue.max_concurrent_loads(), 4);

        h.process_at(Duration::from_millis(1));
        assert_eq!(h.queue.active_load_count(), 4);
        assert_eq!(h.state("e"), Some(ResourceState::Queued));

        for key in ["a", "b", "c", "d"] {
            loader.complete(key, 1);
        }
        h.process_at(Duration::from_millis(2));
        assert_eq!(h.queue.active_load_count(), 1);
        h.queue.set_max_concurrent_loads(1).unwrap();
        assert_eq!(h.queue.max_concurrent_loads(), 1);
        assert!(h.queue.active_load_count() <= h.queue.max_concurrent_loads());
    }

    #[test]
    fn pending_unload_leaves_resource_unloaded_and_untracked() {
        let loader = Arc::new(GatedLoader::new());
        let mut h = Harness::new(config(1), loader.clone());
        h.submit("a", Priority::Medium);
        h.process_at(Duration::ZERO);
        loader.complete("a", 64);
        h.process_at(Duration::ZERO);
        assert_eq!(h.state("a"), Some(ResourceState::Loaded));
        assert!(h.memory.is_tracked("a"));

        h.queue.enqueue_unload("a".into());
        let report = h.process_at(Duration::from_millis(1));
        assert_eq!(report.unloads_started, 1);
        assert_eq!(h.queue.active_unload_count(), 1);
        assert_eq!(h.state("a"), Some(ResourceState::Unloaded));
        assert!(h.registry.get("a").unwrap().handle().is_none());
        assert!(!h.memory.is_tracked("a"));
        // No reload until the loader has let go.
        assert!(!h.queue.enqueue_load("a".into(), Priority::High, h.t0));

        loader.complete_unload("a");
        h.process_at(Duration::from_millis(2));
        assert_eq!(h.queue.active_unload_count(), 0);
        assert_eq!(h.state("a"), Some(ResourceState::Unloaded));
        assert_eq!(h.metrics.unloads().successes, 1);
        assert!(h.queue.enqueue_load("a".into(), Priority::High, h.t0));
    }

    #[test]
    fn timed_out_unload_counts_as_failure() {
        let loader = Arc::new(GatedLoader::new());
        let mut h = Harness::new(config(1), loader.clone());
        h.submit("a", Priority::Medium);
        h.process_at(Duration::ZERO);
        loader.complete("a", 64);
        h.process_at(Duration::ZERO);

        h.queue.enqueue_unload("a".into());
        h.process_at(Duration::from_secs(1));
        assert_eq!(h.state("a"), Some(ResourceState::Unloaded));

        h.process_at(Duration::from_secs(7));
        assert_eq!(h.queue.active_unload_count(), 0);
        assert_eq!(h.state("a"), Some(ResourceState::Unloaded));
        assert_eq!(h.metrics.unloads().successes, 0);
        assert_eq!(h.metrics.unloads().failures, 1);
        assert_eq!(h.memory.tracked_bytes(), 0);
    }

    #[test]
    fn release_polls_detached_unloads_to_completion() {
        let loader = Arc::new(GatedLoader::new());
        let mut h = Harness::new(config(1), loader.clone());
        h.queue.release(&"gone".into());
        assert_eq!(h.queue.detached_count(), 1);

        h.process_at(Duration::ZERO);
        assert_eq!(h.queue.detached_count(), 1);

        loader.complete_unload("gone");
        h.process_at(Duration::from_millis(1));
        assert_eq!(h.queue.detached_count(), 0);
        assert_eq!(loader.unload_calls(), vec![ResourceKey::from("gone")]);
    }
}
