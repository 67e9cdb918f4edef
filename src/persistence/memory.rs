use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{ListedShardIterator, ShardIterator, ShardStore};
use crate::error::{GeodexError, Result};
use crate::models::{DataType, ShardNo};

/// Ordered in-memory shard store.
#[derive(Default)]
pub struct MemoryShardStore {
    shards: RwLock<BTreeMap<(DataType, ShardNo), Bytes>>,
    closed: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
}

impl MemoryShardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put_shard` fail, to exercise error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of `get_shard` calls served
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.shards.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.read().is_empty()
    }
}

#[async_trait]
impl ShardStore for MemoryShardStore {
    async fn get_shard(&self, ty: DataType, shard: ShardNo) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.shards.read().get(&(ty, shard)).cloned())
    }

    async fn put_shard(&self, ty: DataType, shard: ShardNo, data: Bytes) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GeodexError::persistence(ty, Some(shard), "write rejected"));
        }
        self.shards.write().insert((ty, shard), data);
        Ok(())
    }

    async fn list_shards(&self, ty: DataType) -> Result<Vec<ShardNo>> {
        Ok(self
            .shards
            .read()
            .range((ty, 0)..=(ty, ShardNo::MAX))
            .map(|((_, shard), _)| *shard)
            .collect())
    }

    fn shard_iter<'a>(&'a self, ty: DataType) -> Box<dyn ShardIterator + 'a> {
        Box::new(ListedShardIterator::new(self, ty))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
