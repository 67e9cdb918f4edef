use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use super::patch::Patch;
use crate::cache::ShardedCache;
use crate::config::{IndexConfig, IndexMeta};
use crate::dictionary::{merge_sorted, Dictionary, DictionaryWriter, DICTIONARY_SHARD};
use crate::error::{GeodexError, Result};
use crate::metrics::IndexMetrics;
use crate::models::{DataType, ShardNo};
use crate::persistence::ShardStore;

/// `stat` shard holding [`IndexMeta`] as JSON
pub const META_SHARD: ShardNo = 1;

/// Types whose shards live in the cache
const CACHED_TYPES: [DataType; 6] = [
    DataType::Freq,
    DataType::Term,
    DataType::Phrase,
    DataType::Grid,
    DataType::Degen,
    DataType::Feature,
];

/// Counters for one `store_all`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub shards: usize,
    pub dictionary_entries: usize,
}

/// Handle of one index: its cache, its backend and the pending dictionary.
///
/// A handle assumes it is the only writer of its backend.
pub struct IndexSource {
    name: String,
    meta: IndexMeta,
    cache: ShardedCache,
    store: Arc<dyn ShardStore>,
    dictionary: DictionaryWriter,
}

impl IndexSource {
    /// Open an index over `store`. If the store already holds an index its
    /// metadata must match `config`.
    pub async fn open(
        name: impl Into<String>,
        config: IndexConfig,
        store: Arc<dyn ShardStore>,
    ) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        let mut meta = config.meta();
        if let Some(existing) = read_meta(store.as_ref()).await? {
            existing.check_compatible(&meta)?;
            meta = existing.merged(&meta);
            debug!(index = %name, "opened existing index");
        }
        Ok(Self {
            cache: ShardedCache::new(name.clone(), meta.shard_levels),
            name,
            meta,
            store,
            dictionary: DictionaryWriter::new(),
        })
    }

    /// Count backend shard fetches of this index's cache
    pub fn with_metrics(mut self, metrics: IndexMetrics) -> Self {
        self.cache = self.cache.with_metrics(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn cache(&self) -> &ShardedCache {
        &self.cache
    }

    pub fn store(&self) -> &dyn ShardStore {
        self.store.as_ref()
    }

    /// Apply a batch patch to the cache and queue its dictionary entries.
    pub async fn apply_patch(&mut self, patch: &Patch) -> Result<usize> {
        let written = patch.apply(&self.cache, self.store.as_ref()).await?;
        for text in patch.dictionary() {
            self.dictionary.insert(text)?;
        }
        Ok(written)
    }

    /// Write every materialized shard, the dictionary (united with the one
    /// already persisted) and the metadata to the backend, then flush it.
    pub async fn store_all(&mut self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for ty in CACHED_TYPES {
            for shard_no in self.cache.materialized_shards(ty) {
                let data = self.cache.pack(ty, shard_no)?;
                self.store.put_shard(ty, shard_no, data).await?;
                stats.shards += 1;
            }
        }

        let pending = std::mem::take(&mut self.dictionary).finish()?;
        let dictionary = match read_dictionary(self.store.as_ref()).await? {
            Some(existing) => merge_sorted(existing.keys(), pending.keys())?,
            None => pending,
        };
        stats.dictionary_entries = dictionary.len();
        self.store
            .put_shard(
                DataType::Stat,
                DICTIONARY_SHARD,
                Bytes::copy_from_slice(dictionary.as_bytes()),
            )
            .await?;
        write_meta(self.store.as_ref(), &self.meta).await?;
        self.store.close().await?;

        info!(
            index = %self.name,
            shards = stats.shards,
            dictionary = stats.dictionary_entries,
            "stored index"
        );
        Ok(stats)
    }

    /// Store everything and drop the in-memory state.
    pub async fn close(mut self) -> Result<StoreStats> {
        let stats = self.store_all().await?;
        for ty in CACHED_TYPES {
            self.cache.unload(ty);
        }
        Ok(stats)
    }
}

/// Metadata persisted in a backend, if any
pub async fn read_meta(store: &dyn ShardStore) -> Result<Option<IndexMeta>> {
    match store.get_shard(DataType::Stat, META_SHARD).await? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        None => Ok(None),
    }
}

pub async fn write_meta(store: &dyn ShardStore, meta: &IndexMeta) -> Result<()> {
    let raw = serde_json::to_vec(meta)?;
    store
        .put_shard(DataType::Stat, META_SHARD, Bytes::from(raw))
        .await
}

/// Completion dictionary persisted in a backend, if any
pub async fn read_dictionary(store: &dyn ShardStore) -> Result<Option<Dictionary>> {
    match store.get_shard(DataType::Stat, DICTIONARY_SHARD).await? {
        Some(raw) => Ok(Some(Dictionary::from_bytes(raw.to_vec())?)),
        None => Ok(None),
    }
}

/// Metadata of a backend that must already hold an index
pub async fn require_meta(store: &dyn ShardStore, label: &str) -> Result<IndexMeta> {
    read_meta(store)
        .await?
        .ok_or_else(|| GeodexError::InvalidRequest(format!("{} holds no index metadata", label)))
}
