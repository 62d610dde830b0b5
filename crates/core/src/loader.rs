use futures::future::BoxFuture;

use assetstream_common::ResourceKey;

use crate::error::LoadError;
use crate::resource::ResourceHandle;

/// External collaborator that turns keys into payloads.
///
/// Both calls return futures that the queue manager polls once per
/// coordination cycle; they must not block. Dropping a returned future
/// cancels the operation.
pub trait AssetLoader: Send + Sync {
    fn load(&self, key: &ResourceKey) -> BoxFuture<'static, Result<ResourceHandle, LoadError>>;

    fn unload(&self, key: &ResourceKey) -> BoxFuture<'static, ()>;
}
