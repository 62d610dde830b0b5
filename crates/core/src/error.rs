use std::time::Duration;

use assetstream_common::ResourceKey;

use crate::resource::ResourceState;

/// Invalid streaming configuration. Fatal at construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error("unload_radius ({unload}) must not be smaller than streaming_radius ({streaming})")]
    UnloadInsideStreaming { streaming: f32, unload: f32 },
    #[error("high_priority_radius ({high}) must be smaller than low_priority_radius ({low})")]
    PriorityRadiiInverted { high: f32, low: f32 },
    #[error(
        "critical memory threshold ({critical} bytes) must exceed the high threshold ({high} bytes)"
    )]
    MemoryThresholdsInverted { high: u64, critical: u64 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{name} must be at least {min}")]
    TooSmall { name: &'static str, min: usize },
}

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("resource key is empty")]
    EmptyKey,
    #[error("registry is at capacity ({max} resources)")]
    CapacityExceeded { max: usize },
    #[error("resource not registered: {0}")]
    NotFound(ResourceKey),
    #[error("invalid transition for {key}: {from:?} -> {to:?}")]
    InvalidTransition {
        key: ResourceKey,
        from: ResourceState,
        to: ResourceState,
    },
    #[error("{0} cannot become Loaded without a handle")]
    MissingHandle(ResourceKey),
}

/// Error reported by an external [`AssetLoader`](crate::AssetLoader).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("asset not found: {0}")]
    NotFound(ResourceKey),
    #[error("asset {key} failed to load: {reason}")]
    Failed { key: ResourceKey, reason: String },
}

/// Why a load operation ended without a payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadFailure {
    #[error(transparent)]
    Loader(#[from] LoadError),
    #[error("load timed out after {0:?}")]
    TimedOut(Duration),
}

impl LoadFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LoadFailure::TimedOut(_))
    }
}
