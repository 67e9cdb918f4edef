//! Shard persistence: the get/put-by-shard contract used by the cache and
//! the merge engine, with in-memory and Fjall-backed implementations.

mod fjall_store;
mod memory;

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{GeodexError, Result};
use crate::models::{DataType, ShardNo};

pub use fjall_store::FjallShardStore;
pub use memory::MemoryShardStore;

/// Backend holding `{type}/{shard_no} -> blob`.
///
/// Point access has no ordering requirement; [`ShardStore::shard_iter`]
/// must yield shards in strictly ascending order.
#[async_trait]
pub trait ShardStore: Send + Sync {
    async fn get_shard(&self, ty: DataType, shard: ShardNo) -> Result<Option<Bytes>>;

    async fn put_shard(&self, ty: DataType, shard: ShardNo, data: Bytes) -> Result<()>;

    /// Shard numbers present for a type, ascending
    async fn list_shards(&self, ty: DataType) -> Result<Vec<ShardNo>>;

    /// Ordered stream over every shard of a type
    fn shard_iter<'a>(&'a self, ty: DataType) -> Box<dyn ShardIterator + 'a>;

    /// Flush pending writes to durable storage.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Stream of `(shard_no, data)` pairs for one data type
#[async_trait]
pub trait ShardIterator: Send {
    fn data_type(&self) -> DataType;

    /// Next shard, or `None` once exhausted
    async fn next(&mut self) -> Result<Option<(ShardNo, Bytes)>>;
}

/// Iterator that lists a store's shards once, then fetches them one by one.
pub struct ListedShardIterator<'a> {
    store: &'a dyn ShardStore,
    ty: DataType,
    pending: Option<VecDeque<ShardNo>>,
}

impl<'a> ListedShardIterator<'a> {
    pub fn new(store: &'a dyn ShardStore, ty: DataType) -> Self {
        Self {
            store,
            ty,
            pending: None,
        }
    }
}

#[async_trait]
impl<'a> ShardIterator for ListedShardIterator<'a> {
    fn data_type(&self) -> DataType {
        self.ty
    }

    async fn next(&mut self) -> Result<Option<(ShardNo, Bytes)>> {
        if self.pending.is_none() {
            let mut shards = self.store.list_shards(self.ty).await?;
            shards.sort_unstable();
            self.pending = Some(shards.into());
        }
        let Some(pending) = self.pending.as_mut() else {
            return Ok(None);
        };
        while let Some(shard) = pending.pop_front() {
            // A shard listed but gone by fetch time was removed concurrently.
            if let Some(data) = self.store.get_shard(self.ty, shard).await? {
                return Ok(Some((shard, data)));
            }
        }
        Ok(None)
    }
}

/// Iterator over a fixed sequence, replayed exactly as given.
pub struct VecShardIterator {
    ty: DataType,
    items: VecDeque<(ShardNo, Bytes)>,
}

impl VecShardIterator {
    pub fn new(ty: DataType, items: Vec<(ShardNo, Bytes)>) -> Self {
        Self {
            ty,
            items: items.into(),
        }
    }
}

#[async_trait]
impl ShardIterator for VecShardIterator {
    fn data_type(&self) -> DataType {
        self.ty
    }

    async fn next(&mut self) -> Result<Option<(ShardNo, Bytes)>> {
        Ok(self.items.pop_front())
    }
}

/// Decode the big-endian shard key used by ordered backends.
pub(crate) fn decode_shard_key(ty: DataType, key: &[u8]) -> Result<ShardNo> {
    let raw: [u8; 8] = key.try_into().map_err(|_| {
        GeodexError::persistence(ty, None, format!("shard key has {} bytes", key.len()))
    })?;
    Ok(u64::from_be_bytes(raw))
}
