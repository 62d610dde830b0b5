use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use assetstream_common::{Priority, ResourceKey, Vec3};

use crate::error::RegistryError;
use crate::resource::{ResourceHandle, ResourceState, StreamableResource};

/// Outcome of a successful [`AssetRegistry::register`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Inserted,
    /// The key already existed; position, priority and tags were refreshed.
    Updated,
}

/// Number of resources per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub unloaded: usize,
    pub queued: usize,
    pub loading: usize,
    pub loaded: usize,
    pub failed: usize,
}

impl StateCounts {
    fn slot(&mut self, state: ResourceState) -> &mut usize {
        match state {
            ResourceState::Unloaded => &mut self.unloaded,
            ResourceState::Queued => &mut self.queued,
            ResourceState::Loading => &mut self.loading,
            ResourceState::Loaded => &mut self.loaded,
            ResourceState::Failed => &mut self.failed,
        }
    }

    fn moved(&mut self, from: ResourceState, to: ResourceState) {
        *self.slot(from) -= 1;
        *self.slot(to) += 1;
    }
}

/// Authoritative table of streamable resources.
///
/// Records are owned here and only mutated through explicit operations.
/// BTreeMap keeps iteration order deterministic, so cycles visit resources
/// in the same order on every run.
#[derive(Debug)]
pub struct AssetRegistry {
    resources: BTreeMap<ResourceKey, StreamableResource>,
    max_resources: usize,
    counts: StateCounts,
}

impl AssetRegistry {
    pub fn new(max_resources: usize) -> Self {
        Self {
            resources: BTreeMap::new(),
            max_resources,
            counts: StateCounts::default(),
        }
    }

    /// Insert a resource, or refresh position/priority/tags/access time of
    /// an existing one. Re-registering a `Failed` resource resets it to
    /// `Unloaded` so the next cycle may queue it again.
    pub fn register<I, S>(
        &mut self,
        key: ResourceKey,
        position: Vec3,
        priority: Priority,
        tags: I,
        now: Instant,
    ) -> Result<Registration, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if key.is_empty() {
            return Err(RegistryError::EmptyKey);
        }
        let tags: BTreeSet<String> = tags.into_iter().map(Into::into).collect();

        if let Some(resource) = self.resources.get_mut(&key) {
            resource.position = position;
            resource.base_priority = priority;
            resource.tags = tags;
            resource.last_access_time = now;
            if resource.state == ResourceState::Failed {
                resource.state = ResourceState::Unloaded;
                resource.last_failure = None;
                self.counts
                    .moved(ResourceState::Failed, ResourceState::Unloaded);
            }
            return Ok(Registration::Updated);
        }

        if self.resources.len() >= self.max_resources {
            return Err(RegistryError::CapacityExceeded {
                max: self.max_resources,
            });
        }

        tracing::debug!(key = %key, ?priority, "registered resource");
        self.resources.insert(
            key.clone(),
            StreamableResource::new(key, position, priority, tags, now),
        );
        self.counts.unloaded += 1;
        Ok(Registration::Inserted)
    }

    /// Remove a resource and return its final record.
    ///
    /// Callers owning the queue and loader must cancel in-flight work and
    /// notify the loader for `Loaded` records.
    pub fn unregister(&mut self, key: &str) -> Option<StreamableResource> {
        let removed = self.resources.remove(key)?;
        *self.counts.slot(removed.state) -= 1;
        Some(removed)
    }

    pub fn update_distance(&mut self, key: &str, distance: f32) -> Result<(), RegistryError> {
        self.get_mut(key)?.distance_from_viewpoint = distance;
        Ok(())
    }

    pub fn set_effective_priority(
        &mut self,
        key: &str,
        priority: Priority,
    ) -> Result<(), RegistryError> {
        self.get_mut(key)?.effective_priority = priority;
        Ok(())
    }

    /// Recompute distance and effective priority of every resource in place.
    pub fn refresh<F>(&mut self, mut score: F)
    where
        F: FnMut(&StreamableResource) -> (f32, Priority),
    {
        for resource in self.resources.values_mut() {
            let (distance, priority) = score(resource);
            resource.distance_from_viewpoint = distance;
            resource.effective_priority = priority;
        }
    }

    /// Replace the base priority, e.g. when a caller forces a load.
    pub fn set_base_priority(&mut self, key: &str, priority: Priority) -> Result<(), RegistryError> {
        self.get_mut(key)?.base_priority = priority;
        Ok(())
    }

    /// Move a resource along the lifecycle graph and return its previous
    /// state. Entering `Loaded` requires a handle, see [`Self::complete_load`].
    pub fn transition_state(
        &mut self,
        key: &str,
        new_state: ResourceState,
    ) -> Result<ResourceState, RegistryError> {
        if new_state == ResourceState::Loaded {
            return Err(RegistryError::MissingHandle(ResourceKey::from(key)));
        }
        let from = self.apply_transition(key, new_state)?;
        if let Some(resource) = self.resources.get_mut(key) {
            resource.handle = None;
            if new_state == ResourceState::Queued {
                resource.last_failure = None;
            }
        }
        Ok(from)
    }

    /// `Loading -> Loaded`, attaching the payload handle.
    pub fn complete_load(
        &mut self,
        key: &str,
        handle: ResourceHandle,
        now: Instant,
    ) -> Result<(), RegistryError> {
        self.apply_transition(key, ResourceState::Loaded)?;
        let resource = self.get_mut(key)?;
        resource.handle = Some(handle);
        resource.last_access_time = now;
        Ok(())
    }

    /// `Loading -> Failed`, recording the reason.
    pub fn fail_load(&mut self, key: &str, reason: String) -> Result<(), RegistryError> {
        self.transition_state(key, ResourceState::Failed)?;
        self.get_mut(key)?.last_failure = Some(reason);
        Ok(())
    }

    /// Refresh the last access time of a resource.
    pub fn touch(&mut self, key: &str, now: Instant) -> bool {
        match self.resources.get_mut(key) {
            Some(resource) => {
                resource.last_access_time = now;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&StreamableResource> {
        self.resources.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.resources.contains_key(key)
    }

    pub fn state_of(&self, key: &str) -> Option<ResourceState> {
        self.resources.get(key).map(|r| r.state)
    }

    pub fn list_all(&self) -> impl Iterator<Item = &StreamableResource> {
        self.resources.values()
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        self.resources.keys().cloned().collect()
    }

    pub fn list_by_tag(&self, tag: &str) -> Vec<&StreamableResource> {
        self.resources.values().filter(|r| r.has_tag(tag)).collect()
    }

    /// Resources whose last computed distance is at most `max`.
    pub fn list_within_distance(&self, max: f32) -> Vec<&StreamableResource> {
        self.resources
            .values()
            .filter(|r| r.distance_from_viewpoint <= max)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_resources
    }

    pub fn counts(&self) -> StateCounts {
        self.counts
    }

    pub fn loaded_count(&self) -> usize {
        self.counts.loaded
    }

    pub fn loading_count(&self) -> usize {
        self.counts.loading
    }

    fn get_mut(&mut self, key: &str) -> Result<&mut StreamableResource, RegistryError> {
        self.resources
            .get_mut(key)
            .ok_or_else(|| RegistryError::NotFound(ResourceKey::from(key)))
    }

    fn apply_transition(
        &mut self,
        key: &str,
        to: ResourceState,
    ) -> Result<ResourceState, RegistryError> {
        let resource = self
            .resources
            .get_mut(key)
            .ok_or_else(|| RegistryError::NotFound(ResourceKey::from(key)))?;
        let from = resource.state;
        if !from.can_transition_to(to) {
            return Err(RegistryError::InvalidTransition {
                key: resource.key.clone(),
                from,
                to,
            });
        }
        resource.state = to;
        self.counts.moved(from, to);
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const NO_TAGS: [&str; 0] = [];

    fn registry_with(keys: &[&str]) -> (AssetRegistry, Instant) {
        let now = Instant::now();
        let mut registry = AssetRegistry::new(16);
        for key in keys {
            registry
                .register((*key).into(), Vec3::ZERO, Priority::Medium, NO_TAGS, now)
                .unwrap();
        }
        (registry, now)
    }

    fn load(registry: &mut AssetRegistry, key: &str, now: Instant) {
        registry.transition_state(key, ResourceState::Queued).unwrap();
        registry.transition_state(key, ResourceState::Loading).unwrap();
        registry
            .complete_load(key, ResourceHandle::new(key.to_string(), 64), now)
            .unwrap();
    }

    #[test]
    fn register_inserts_then_updates_in_place() {
        let (mut registry, now) = registry_with(&[]);
        let later = now + Duration::from_secs(3);

        let first = registry
            .register("rock".into(), Vec3::ZERO, Priority::Low, ["terrain"], now)
            .unwrap();
        let second = registry
            .register(
                "rock".into(),
                Vec3::new(5.0, 0.0, 0.0),
                Priority::High,
                ["ui"],
                later,
            )
            .unwrap();

        assert_eq!(first, Registration::Inserted);
        assert_eq!(second, Registration::Updated);
        assert_eq!(registry.len(), 1);

        let rock = registry.get("rock").unwrap();
        assert_eq!(rock.position(), Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(rock.base_priority(), Priority::High);
        assert!(rock.has_tag("UI"));
        assert!(!rock.has_tag("terrain"));
        assert_eq!(rock.last_access_time(), later);
        assert_eq!(rock.registration_time(), now);
    }

    #[test]
    fn register_rejects_empty_key_and_capacity() {
        let now = Instant::now();
        let mut registry = AssetRegistry::new(1);
        assert_eq!(
            registry.register("".into(), Vec3::ZERO, Priority::Medium, NO_TAGS, now),
            Err(RegistryError::EmptyKey)
        );
        registry
            .register("a".into(), Vec3::ZERO, Priority::Medium, NO_TAGS, now)
            .unwrap();
        assert_eq!(
            registry.register("b".into(), Vec3::ZERO, Priority::Medium, NO_TAGS, now),
            Err(RegistryError::CapacityExceeded { max: 1 })
        );
        // Updating an existing key is allowed at capacity.
        assert!(
            registry
                .register("a".into(), Vec3::ONE, Priority::Medium, NO_TAGS, now)
                .is_ok()
        );
    }

    #[test]
    fn handle_present_only_when_loaded() {
        let (mut registry, now) = registry_with(&["tree"]);
        load(&mut registry, "tree", now);
        let tree = registry.get("tree").unwrap();
        assert!(tree.is_loaded());
        assert!(tree.handle().is_some());

        registry
            .transition_state("tree", ResourceState::Unloaded)
            .unwrap();
        let tree = registry.get("tree").unwrap();
        assert_eq!(tree.state(), ResourceState::Unloaded);
        assert!(tree.handle().is_none());
    }

    #[test]
    fn loaded_requires_handle() {
        let (mut registry, _) = registry_with(&["tree"]);
        registry.transition_state("tree", ResourceState::Queued).unwrap();
        registry
            .transition_state("tree", ResourceState::Loading)
            .unwrap();
        assert_eq!(
            registry.transition_state("tree", ResourceState::Loaded),
            Err(RegistryError::MissingHandle("tree".into()))
        );
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let (mut registry, now) = registry_with(&["tree"]);
        let err = registry
            .transition_state("tree", ResourceState::Loading)
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));

        let err = registry
            .complete_load("tree", ResourceHandle::new((), 0), now)
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
        assert_eq!(registry.state_of("tree"), Some(ResourceState::Unloaded));

        assert_eq!(
            registry.transition_state("ghost", ResourceState::Queued),
            Err(RegistryError::NotFound("ghost".into()))
        );
    }

    #[test]
    fn counts_follow_transitions() {
        let (mut registry, now) = registry_with(&["a", "b", "c"]);
        load(&mut registry, "a", now);
        registry.transition_state("b", ResourceState::Queued).unwrap();
        registry.transition_state("b", ResourceState::Loading).unwrap();

        assert_eq!(registry.loaded_count(), 1);
        assert_eq!(registry.loading_count(), 1);
        assert_eq!(registry.counts().unloaded, 1);

        registry.fail_load("b", "disk on fire".into()).unwrap();
        assert_eq!(registry.loading_count(), 0);
        assert_eq!(registry.counts().failed, 1);
        assert_eq!(registry.get("b").unwrap().last_failure(), Some("disk on fire"));

        registry.unregister("a");
        assert_eq!(registry.loaded_count(), 0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn reregistering_failed_resource_resets_it() {
        let (mut registry, now) = registry_with(&["a"]);
        registry.transition_state("a", ResourceState::Queued).unwrap();
        registry.transition_state("a", ResourceState::Loading).unwrap();
        registry.fail_load("a", "timeout".into()).unwrap();

        registry
            .register("a".into(), Vec3::ZERO, Priority::Medium, NO_TAGS, now)
            .unwrap();
        let a = registry.get("a").unwrap();
        assert_eq!(a.state(), ResourceState::Unloaded);
        assert!(a.last_failure().is_none());
        assert_eq!(registry.counts().failed, 0);
        assert_eq!(registry.counts().unloaded, 1);
    }

    #[test]
    fn queries_by_tag_and_distance() {
        let now = Instant::now();
        let mut registry = AssetRegistry::new(8);
        registry
            .register("hud".into(), Vec3::ZERO, Priority::High, ["ui"], now)
            .unwrap();
        registry
            .register("wind".into(), Vec3::ZERO, Priority::Low, ["ambient"], now)
            .unwrap();
        registry.update_distance("hud", 5.0).unwrap();
        registry.update_distance("wind", 500.0).unwrap();

        let ui: Vec<_> = registry.list_by_tag("ui").iter().map(|r| r.key().clone()).collect();
        assert_eq!(ui, vec![ResourceKey::from("hud")]);

        let near = registry.list_within_distance(10.0);
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].key().as_str(), "hud");
        assert_eq!(registry.list_all().count(), 2);
    }
}
