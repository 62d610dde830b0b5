use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Poll;

use assetstream_common::ResourceKey;
use assetstream_core::{AssetLoader, LoadError, MemoryProbe, ResourceHandle};
use futures::FutureExt;
use futures::future::{self, BoxFuture};

use crate::scenario::ResourceSpec;

/// Payload handed out by [`SimLoader`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimAsset {
    pub key: ResourceKey,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
struct Behaviour {
    load_polls: u32,
    size_bytes: u64,
    fail: bool,
}

/// Loader whose operations finish after a fixed number of polls, i.e.
/// coordination cycles.
pub struct SimLoader {
    assets: HashMap<ResourceKey, Behaviour>,
    unloads: AtomicUsize,
}

impl SimLoader {
    pub fn new(specs: &[ResourceSpec]) -> Self {
        let assets = specs
            .iter()
            .map(|spec| {
                (
                    ResourceKey::new(spec.key.as_str()),
                    Behaviour {
                        load_polls: spec.load_polls,
                        size_bytes: spec.size_bytes,
                        fail: spec.fail,
                    },
                )
            })
            .collect();
        Self {
            assets,
            unloads: AtomicUsize::new(0),
        }
    }

    /// Unload notifications received so far.
    pub fn unload_count(&self) -> usize {
        self.unloads.load(Ordering::Relaxed)
    }
}

impl AssetLoader for SimLoader {
    fn load(&self, key: &ResourceKey) -> BoxFuture<'static, Result<ResourceHandle, LoadError>> {
        let Some(behaviour) = self.assets.get(key).copied() else {
            return future::ready(Err(LoadError::NotFound(key.clone()))).boxed();
        };
        let key = key.clone();
        let mut remaining = behaviour.load_polls;
        future::poll_fn(move |_cx| {
            if remaining > 0 {
                remaining -= 1;
                return Poll::Pending;
            }
            if behaviour.fail {
                return Poll::Ready(Err(LoadError::Failed {
                    key: key.clone(),
                    reason: "simulated failure".into(),
                }));
            }
            let asset = SimAsset {
                key: key.clone(),
                size_bytes: behaviour.size_bytes,
            };
            Poll::Ready(Ok(ResourceHandle::new(asset, behaviour.size_bytes)))
        })
        .boxed()
    }

    fn unload(&self, key: &ResourceKey) -> BoxFuture<'static, ()> {
        tracing::trace!(key = %key, "simulated unload");
        self.unloads.fetch_add(1, Ordering::Relaxed);
        future::ready(()).boxed()
    }
}

/// Reports nothing, so the engine measures pressure from the sizes of
/// the assets it tracks. Keeps simulated runs deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackedSizesOnly;

impl MemoryProbe for TrackedSizesOnly {
    fn resident_bytes(&self) -> Option<u64> {
        None
    }
}
