//! Shared types for the asset streaming engine.
//!
//! Keys, priorities and the clock abstraction live here so that loaders,
//! drivers and the engine agree on them without depending on each other.

mod clock;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use glam::Vec3;
pub use types::{Priority, ResourceKey};
