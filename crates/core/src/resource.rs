use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use assetstream_common::{Priority, ResourceKey, Vec3};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a streamable resource.
///
/// ```text
/// Unloaded -> Queued -> Loading -> Loaded | Failed
/// Loaded   -> Unloaded           (unload completed)
/// Queued | Loading -> Unloaded   (load cancelled)
/// Failed   -> Queued | Unloaded  (explicit retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResourceState {
    #[default]
    Unloaded,
    Queued,
    Loading,
    Loaded,
    Failed,
}

impl ResourceState {
    /// Whether `self -> to` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, to: ResourceState) -> bool {
        use ResourceState::*;
        matches!(
            (self, to),
            (Unloaded, Queued)
                | (Queued, Loading)
                | (Queued, Unloaded)
                | (Loading, Loaded)
                | (Loading, Failed)
                | (Loading, Unloaded)
                | (Loaded, Unloaded)
                | (Failed, Queued)
                | (Failed, Unloaded)
        )
    }
}

/// Opaque, cheaply clonable reference to a loaded payload.
#[derive(Clone)]
pub struct ResourceHandle {
    payload: Arc<dyn Any + Send + Sync>,
    size_bytes: u64,
}

impl ResourceHandle {
    pub fn new<T: Any + Send + Sync>(payload: T, size_bytes: u64) -> Self {
        Self {
            payload: Arc::new(payload),
            size_bytes,
        }
    }

    /// Estimated resident size reported by the loader.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// True when both handles point at the same payload.
    pub fn ptr_eq(&self, other: &ResourceHandle) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

/// A resource tracked by the registry.
///
/// `handle` is `Some` exactly when `state == Loaded`; only the registry
/// mutates these records.
#[derive(Debug, Clone)]
pub struct StreamableResource {
    pub(crate) key: ResourceKey,
    pub(crate) position: Vec3,
    pub(crate) base_priority: Priority,
    pub(crate) effective_priority: Priority,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) state: ResourceState,
    pub(crate) distance_from_viewpoint: f32,
    pub(crate) registration_time: Instant,
    pub(crate) last_access_time: Instant,
    pub(crate) handle: Option<ResourceHandle>,
    pub(crate) last_failure: Option<String>,
}

impl StreamableResource {
    pub(crate) fn new(
        key: ResourceKey,
        position: Vec3,
        priority: Priority,
        tags: BTreeSet<String>,
        now: Instant,
    ) -> Self {
        Self {
            key,
            position,
            base_priority: priority,
            effective_priority: priority,
            tags,
            state: ResourceState::Unloaded,
            distance_from_viewpoint: f32::INFINITY,
            registration_time: now,
            last_access_time: now,
            handle: None,
            last_failure: None,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn base_priority(&self) -> Priority {
        self.base_priority
    }

    /// Priority computed during the most recent coordination cycle.
    pub fn effective_priority(&self) -> Priority {
        self.effective_priority
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Case-insensitive tag check.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn distance_from_viewpoint(&self) -> f32 {
        self.distance_from_viewpoint
    }

    pub fn registration_time(&self) -> Instant {
        self.registration_time
    }

    pub fn last_access_time(&self) -> Instant {
        self.last_access_time
    }

    pub fn handle(&self) -> Option<&ResourceHandle> {
        self.handle.as_ref()
    }

    /// Reason recorded for the latest failed load, cleared on retry.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ResourceState::Loaded
    }
}
