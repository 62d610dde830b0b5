use std::time::{Duration, Instant};

use assetstream_common::Priority;

use crate::config::StreamConfig;
use crate::error::ConfigError;
use crate::resource::StreamableResource;

/// Accesses more recent than this raise priority one step.
const RECENT_ACCESS: Duration = Duration::from_secs(5);
/// Accesses older than this lower priority one step.
const STALE_ACCESS: Duration = Duration::from_secs(60);

/// Scores resources by distance, tags and recency and derives the
/// load/unload thresholds. Holds only its radii, no global state.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityCalculator {
    streaming_radius: f32,
    unload_radius: f32,
    high_priority_radius: f32,
    low_priority_radius: f32,
}

impl PriorityCalculator {
    pub fn new(config: &StreamConfig) -> Result<Self, ConfigError> {
        config.validate_radii()?;
        Ok(Self {
            streaming_radius: config.streaming_radius,
            unload_radius: config.unload_radius,
            high_priority_radius: config.high_priority_radius,
            low_priority_radius: config.low_priority_radius,
        })
    }

    pub fn streaming_radius(&self) -> f32 {
        self.streaming_radius
    }

    pub fn unload_radius(&self) -> f32 {
        self.unload_radius
    }

    /// Effective priority of `resource` at `distance` from the viewpoint.
    ///
    /// Distance adjusts first, then tags, then recency. The `critical` and
    /// `essential` tags pin the result to `Critical`.
    pub fn effective_priority(
        &self,
        resource: &StreamableResource,
        distance: f32,
        now: Instant,
    ) -> Priority {
        let mut priority = resource.base_priority();

        if distance <= self.high_priority_radius {
            priority = priority.raise();
        } else if distance >= self.low_priority_radius {
            priority = priority.lower();
        }

        if resource.has_tag("critical") || resource.has_tag("essential") {
            return Priority::Critical;
        }
        if resource.has_tag("ui") {
            priority = priority.raise();
        }
        if resource.has_tag("background") || resource.has_tag("ambient") {
            priority = priority.lower();
        }

        let idle = now.saturating_duration_since(resource.last_access_time());
        if idle < RECENT_ACCESS {
            priority = priority.raise();
        } else if idle > STALE_ACCESS {
            priority = priority.lower();
        }

        priority
    }

    /// Distance within which a resource of `priority` should be resident.
    pub fn load_distance(&self, priority: Priority) -> f32 {
        self.streaming_radius * distance_multiplier(priority)
    }

    /// Nothing beyond `unload_radius` loads, whatever its priority.
    pub fn should_load(&self, distance: f32, priority: Priority) -> bool {
        distance <= self.unload_radius && distance <= self.load_distance(priority)
    }

    /// Beyond `unload_radius`, or outside `streaming_radius` and idle for
    /// longer than the priority's inactivity allowance.
    pub fn should_unload(&self, resource: &StreamableResource, distance: f32, now: Instant) -> bool {
        if distance > self.unload_radius {
            return true;
        }
        let idle = now.saturating_duration_since(resource.last_access_time());
        distance > self.streaming_radius
            && idle > inactivity_threshold(resource.effective_priority())
    }
}

pub fn distance_multiplier(priority: Priority) -> f32 {
    match priority {
        Priority::Critical => 1.5,
        Priority::High => 1.2,
        Priority::Medium => 1.0,
        Priority::Low => 0.8,
        Priority::VeryLow => 0.5,
    }
}

/// How long a resource outside the streaming radius may stay untouched.
pub fn inactivity_threshold(priority: Priority) -> Duration {
    let secs = match priority {
        Priority::Critical => 300,
        Priority::High => 120,
        Priority::Medium => 60,
        Priority::Low => 30,
        Priority::VeryLow => 15,
    };
    Duration::from_secs(secs)
}
