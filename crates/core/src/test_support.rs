//! Deterministic loaders for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use assetstream_common::ResourceKey;
use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{self, BoxFuture};

use crate::error::LoadError;
use crate::loader::AssetLoader;
use crate::resource::ResourceHandle;

/// Completes every load and unload on first poll.
pub struct InstantLoader {
    size_bytes: u64,
}

impl InstantLoader {
    pub fn new(size_bytes: u64) -> Self {
        Self { size_bytes }
    }
}

impl AssetLoader for InstantLoader {
    fn load(&self, key: &ResourceKey) -> BoxFuture<'static, Result<ResourceHandle, LoadError>> {
        future::ready(Ok(ResourceHandle::new(key.to_string(), self.size_bytes))).boxed()
    }

    fn unload(&self, _key: &ResourceKey) -> BoxFuture<'static, ()> {
        future::ready(()).boxed()
    }
}

/// Loads never finish; unloads finish immediately.
pub struct NeverLoader;

impl AssetLoader for NeverLoader {
    fn load(&self, _key: &ResourceKey) -> BoxFuture<'static, Result<ResourceHandle, LoadError>> {
        future::pending().boxed()
    }

    fn unload(&self, _key: &ResourceKey) -> BoxFuture<'static, ()> {
        future::ready(()).boxed()
    }
}

/// Every operation stays pending until the test resolves it.
#[derive(Default)]
pub struct GatedLoader {
    loads: Mutex<HashMap<ResourceKey, oneshot::Sender<Result<ResourceHandle, LoadError>>>>,
    unloads: Mutex<HashMap<ResourceKey, oneshot::Sender<()>>>,
    load_calls: Mutex<Vec<ResourceKey>>,
    unload_calls: Mutex<Vec<ResourceKey>>,
}

impl GatedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self, key: &str, size_bytes: u64) {
        if let Some(tx) = self.loads.lock().unwrap().remove(key) {
            let _ = tx.send(Ok(ResourceHandle::new(key.to_string(), size_bytes)));
        }
    }

    pub fn fail(&self, key: &str, reason: &str) {
        if let Some(tx) = self.loads.lock().unwrap().remove(key) {
            let _ = tx.send(Err(LoadError::Failed {
                key: key.into(),
                reason: reason.to_string(),
            }));
        }
    }

    pub fn complete_unload(&self, key: &str) {
        if let Some(tx) = self.unloads.lock().unwrap().remove(key) {
            let _ = tx.send(());
        }
    }

    pub fn load_calls(&self) -> Vec<ResourceKey> {
        self.load_calls.lock().unwrap().clone()
    }

    pub fn unload_calls(&self) -> Vec<ResourceKey> {
        self.unload_calls.lock().unwrap().clone()
    }
}

impl AssetLoader for GatedLoader {
    fn load(&self, key: &ResourceKey) -> BoxFuture<'static, Result<ResourceHandle, LoadError>> {
        let (tx, rx) = oneshot::channel();
        self.loads.lock().unwrap().insert(key.clone(), tx);
        self.load_calls.lock().unwrap().push(key.clone());
        let key = key.clone();
        async move {
            rx.await.unwrap_or_else(|_| {
                Err(LoadError::Failed {
                    key,
                    reason: "loader dropped request".into(),
                })
            })
        }
        .boxed()
    }

    fn unload(&self, key: &ResourceKey) -> BoxFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        self.unloads.lock().unwrap().insert(key.clone(), tx);
        self.unload_calls.lock().unwrap().push(key.clone());
        async move {
            let _ = rx.await;
        }
        .boxed()
    }
}
