//! Type-partitioned, sharded in-memory store over integer ids.
//!
//! Each `(type, shard)` is held either materialized (decoded, mutable) or
//! lazy (raw bytes attached by [`ShardedCache::load_shard`]). A lazy shard is
//! decoded on first read and promoted. Once a shard is materialized it is
//! authoritative, including the empty shard left by
//! [`ShardedCache::unload_shard`].

pub mod codec;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::ShardLevels;
use crate::error::{GeodexError, Result};
use crate::metrics::IndexMetrics;
use crate::models::{shard, DataType, MergeRule, ShardNo};
use crate::persistence::ShardStore;

pub use codec::FeatureBucket;

/// Value stored under one id
#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    /// Id list (`freq` holds a single count)
    Ids(Vec<u64>),
    /// Feature bucket: documents sharing a feature hash
    Features(FeatureBucket),
}

impl Entry {
    pub fn is_empty(&self) -> bool {
        match self {
            Entry::Ids(ids) => ids.is_empty(),
            Entry::Features(bucket) => bucket.is_empty(),
        }
    }

    pub fn as_ids(&self) -> Option<&[u64]> {
        match self {
            Entry::Ids(ids) => Some(ids),
            Entry::Features(_) => None,
        }
    }

    pub fn as_features(&self) -> Option<&FeatureBucket> {
        match self {
            Entry::Features(bucket) => Some(bucket),
            Entry::Ids(_) => None,
        }
    }

    /// Combine an incoming value with the existing one under `rule`.
    ///
    /// Append is a union that keeps existing order and skips ids already
    /// present, so re-applying a patch leaves the value unchanged. Replace on
    /// a feature bucket replaces per document id, keeping other documents
    /// of the bucket.
    pub fn merge(existing: Option<Entry>, incoming: Entry, rule: MergeRule) -> Entry {
        let Some(existing) = existing else {
            return incoming;
        };
        match (rule, existing, incoming) {
            (_, Entry::Features(mut bucket), Entry::Features(update)) => {
                bucket.extend(update);
                Entry::Features(bucket)
            }
            (MergeRule::Append, Entry::Ids(mut ids), Entry::Ids(more)) => {
                let mut seen: HashSet<u64> = ids.iter().copied().collect();
                ids.extend(more.into_iter().filter(|id| seen.insert(*id)));
                Entry::Ids(ids)
            }
            (MergeRule::Add, Entry::Ids(mut counts), Entry::Ids(more)) => {
                if counts.len() < more.len() {
                    counts.resize(more.len(), 0);
                }
                for (slot, add) in counts.iter_mut().zip(more) {
                    *slot = slot.saturating_add(add);
                }
                Entry::Ids(counts)
            }
            (_, _, incoming) => incoming,
        }
    }
}

#[derive(Default)]
struct LazyShard {
    bytes: Bytes,
    keys: BTreeSet<u64>,
}

#[derive(Default)]
struct TypeCache {
    materialized: HashMap<ShardNo, BTreeMap<u64, Entry>>,
    lazy: HashMap<ShardNo, LazyShard>,
}

/// In-memory cache of one index
pub struct ShardedCache {
    name: String,
    levels: ShardLevels,
    types: RwLock<HashMap<DataType, TypeCache>>,
    metrics: Option<IndexMetrics>,
}

impl ShardedCache {
    pub fn new(name: impl Into<String>, levels: ShardLevels) -> Self {
        Self {
            name: name.into(),
            levels,
            types: RwLock::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: IndexMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shard_levels(&self) -> &ShardLevels {
        &self.levels
    }

    /// Shard owning `id` for this cache's level of `ty`
    pub fn shard_of(&self, ty: DataType, id: u64) -> ShardNo {
        shard(self.levels.level(ty), id)
    }

    /// Value for `id`, promoting its lazy shard on first access.
    pub fn get(&self, ty: DataType, id: u64) -> Result<Option<Entry>> {
        let shard_no = self.shard_of(ty, id);
        {
            let types = self.types.read();
            let Some(cache) = types.get(&ty) else {
                return Ok(None);
            };
            if let Some(rows) = cache.materialized.get(&shard_no) {
                return Ok(rows.get(&id).cloned());
            }
            if !cache.lazy.contains_key(&shard_no) {
                return Ok(None);
            }
        }

        self.promote(ty, shard_no)?;
        let types = self.types.read();
        Ok(types
            .get(&ty)
            .and_then(|cache| cache.materialized.get(&shard_no))
            .and_then(|rows| rows.get(&id).cloned()))
    }

    /// Insert or replace a materialized value.
    pub fn set(&self, ty: DataType, id: u64, value: Entry) -> Result<()> {
        self.validate(ty, id, &value)?;
        let shard_no = self.shard_of(ty, id);
        if self.is_lazy_only(ty, shard_no) {
            self.promote(ty, shard_no)?;
        }
        let mut types = self.types.write();
        types
            .entry(ty)
            .or_default()
            .materialized
            .entry(shard_no)
            .or_default()
            .insert(id, value);
        Ok(())
    }

    fn validate(&self, ty: DataType, id: u64, value: &Entry) -> Result<()> {
        match (ty, value) {
            (DataType::Feature, Entry::Ids(_)) => {
                return Err(GeodexError::invalid_value(
                    ty,
                    id,
                    "feature values must be document buckets",
                ))
            }
            (DataType::Feature, Entry::Features(_)) => {}
            (_, Entry::Features(_)) => {
                return Err(GeodexError::invalid_value(
                    ty,
                    id,
                    "document buckets are only valid for feature",
                ))
            }
            _ => {}
        }
        if value.is_empty() && !ty.allows_empty() {
            return Err(GeodexError::invalid_value(ty, id, "empty value"));
        }
        Ok(())
    }

    /// Batch read across ids, fetching any shard not yet in memory from
    /// `store`. `grid` rows are concatenated as stored; other types are
    /// flattened with duplicates removed, keeping first occurrences.
    pub async fn get_all(
        &self,
        ty: DataType,
        ids: &[u64],
        store: &dyn ShardStore,
    ) -> Result<Vec<u64>> {
        if ty == DataType::Feature {
            return Err(GeodexError::InvalidRequest(
                "get_all does not flatten feature buckets".to_string(),
            ));
        }
        self.ensure_loaded(ty, ids, store).await?;

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for id in ids {
            let Some(Entry::Ids(values)) = self.get(ty, *id)? else {
                continue;
            };
            if ty == DataType::Grid {
                out.extend(values);
            } else {
                out.extend(values.into_iter().filter(|v| seen.insert(*v)));
            }
        }
        Ok(out)
    }

    /// Fetch every shard owning one of `ids` that is neither materialized nor
    /// lazy. A shard missing from the store becomes an empty materialized
    /// shard so later reads do not go back to the store.
    pub async fn ensure_loaded(
        &self,
        ty: DataType,
        ids: &[u64],
        store: &dyn ShardStore,
    ) -> Result<usize> {
        let wanted: BTreeSet<ShardNo> = ids.iter().map(|id| self.shard_of(ty, *id)).collect();
        let mut fetched = 0;
        for shard_no in wanted {
            if self.has_shard(ty, shard_no) {
                continue;
            }
            match store.get_shard(ty, shard_no).await? {
                Some(bytes) => self.load_shard(ty, bytes, shard_no)?,
                None => self.install_empty(ty, shard_no),
            }
            fetched += 1;
        }
        if fetched > 0 {
            if let Some(metrics) = &self.metrics {
                metrics.shards_fetched.inc_by(fetched as f64);
            }
            debug!(cache = %self.name, data_type = %ty, fetched, "fetched shards from store");
        }
        Ok(fetched)
    }

    /// Present in either representation. Lazy shards are checked through
    /// their key index without decoding values.
    pub fn has(&self, ty: DataType, id: u64) -> bool {
        let shard_no = self.shard_of(ty, id);
        let types = self.types.read();
        let Some(cache) = types.get(&ty) else {
            return false;
        };
        if let Some(rows) = cache.materialized.get(&shard_no) {
            return rows.contains_key(&id);
        }
        cache
            .lazy
            .get(&shard_no)
            .map(|lazy| lazy.keys.contains(&id))
            .unwrap_or(false)
    }

    /// Whether a shard is held in either representation
    pub fn has_shard(&self, ty: DataType, shard_no: ShardNo) -> bool {
        let types = self.types.read();
        types
            .get(&ty)
            .map(|c| c.materialized.contains_key(&shard_no) || c.lazy.contains_key(&shard_no))
            .unwrap_or(false)
    }

    /// Ids of a type across both representations, ascending
    pub fn list(&self, ty: DataType) -> Vec<u64> {
        let types = self.types.read();
        let Some(cache) = types.get(&ty) else {
            return Vec::new();
        };
        let mut ids: BTreeSet<u64> = BTreeSet::new();
        for rows in cache.materialized.values() {
            ids.extend(rows.keys().copied());
        }
        for (shard_no, lazy) in &cache.lazy {
            if !cache.materialized.contains_key(shard_no) {
                ids.extend(lazy.keys.iter().copied());
            }
        }
        ids.into_iter().collect()
    }

    /// Shards of a type held in either representation, ascending
    pub fn shards(&self, ty: DataType) -> Vec<ShardNo> {
        let types = self.types.read();
        let Some(cache) = types.get(&ty) else {
            return Vec::new();
        };
        let shards: BTreeSet<ShardNo> = cache
            .materialized
            .keys()
            .chain(cache.lazy.keys())
            .copied()
            .collect();
        shards.into_iter().collect()
    }

    /// Materialized shards of a type, ascending
    pub fn materialized_shards(&self, ty: DataType) -> Vec<ShardNo> {
        let types = self.types.read();
        let mut shards: Vec<ShardNo> = types
            .get(&ty)
            .map(|c| c.materialized.keys().copied().collect())
            .unwrap_or_default();
        shards.sort_unstable();
        shards
    }

    /// Drop both representations of a type. Returns whether anything was held.
    pub fn unload(&self, ty: DataType) -> bool {
        let mut types = self.types.write();
        match types.remove(&ty) {
            Some(cache) => !cache.materialized.is_empty() || !cache.lazy.is_empty(),
            None => false,
        }
    }

    /// Replace one shard with an empty materialized shard, dropping its lazy
    /// bytes. Returns whether the shard held anything.
    pub fn unload_shard(&self, ty: DataType, shard_no: ShardNo) -> bool {
        let mut types = self.types.write();
        let cache = types.entry(ty).or_default();
        let had_lazy = cache.lazy.remove(&shard_no).is_some();
        let had_rows = cache
            .materialized
            .insert(shard_no, BTreeMap::new())
            .map(|rows| !rows.is_empty())
            .unwrap_or(false);
        had_lazy || had_rows
    }

    /// Attach raw bytes as the lazy form of a shard. Only the key set is read
    /// now; values are decoded on first access. A materialized shard is
    /// replaced.
    pub fn load_shard(&self, ty: DataType, bytes: Bytes, shard_no: ShardNo) -> Result<()> {
        let keys = match ty {
            DataType::Feature => codec::scan_feature_keys(&bytes)?,
            _ => codec::scan_id_keys(&bytes)?,
        };
        let mut types = self.types.write();
        let cache = types.entry(ty).or_default();
        cache.materialized.remove(&shard_no);
        cache.lazy.insert(
            shard_no,
            LazyShard {
                bytes,
                keys: keys.into_iter().collect(),
            },
        );
        Ok(())
    }

    /// Serialize a shard for handoff to a persistence backend. A shard that
    /// was never decoded is returned as attached.
    pub fn pack(&self, ty: DataType, shard_no: ShardNo) -> Result<Bytes> {
        let types = self.types.read();
        let cache = types.get(&ty);
        if let Some(rows) = cache.and_then(|c| c.materialized.get(&shard_no)) {
            return encode_rows(ty, rows).map(Bytes::from);
        }
        if let Some(lazy) = cache.and_then(|c| c.lazy.get(&shard_no)) {
            return Ok(lazy.bytes.clone());
        }
        encode_rows(ty, &BTreeMap::new()).map(Bytes::from)
    }

    fn is_lazy_only(&self, ty: DataType, shard_no: ShardNo) -> bool {
        let types = self.types.read();
        types
            .get(&ty)
            .map(|c| !c.materialized.contains_key(&shard_no) && c.lazy.contains_key(&shard_no))
            .unwrap_or(false)
    }

    fn install_empty(&self, ty: DataType, shard_no: ShardNo) {
        let mut types = self.types.write();
        types
            .entry(ty)
            .or_default()
            .materialized
            .entry(shard_no)
            .or_default();
    }

    /// Decode a lazy shard into the materialized map.
    fn promote(&self, ty: DataType, shard_no: ShardNo) -> Result<()> {
        let bytes = {
            let types = self.types.read();
            let Some(cache) = types.get(&ty) else {
                return Ok(());
            };
            if cache.materialized.contains_key(&shard_no) {
                return Ok(());
            }
            match cache.lazy.get(&shard_no) {
                Some(lazy) => lazy.bytes.clone(),
                None => return Ok(()),
            }
        };

        let rows = decode_rows(ty, shard_no, &bytes)?;
        let mut types = self.types.write();
        let cache = types.entry(ty).or_default();
        // Another reader may have promoted the shard meanwhile.
        if !cache.materialized.contains_key(&shard_no) {
            cache.materialized.insert(shard_no, rows);
        }
        cache.lazy.remove(&shard_no);
        Ok(())
    }
}

fn encode_rows(ty: DataType, rows: &BTreeMap<u64, Entry>) -> Result<Vec<u8>> {
    if ty == DataType::Feature {
        let buckets: BTreeMap<u64, FeatureBucket> = rows
            .iter()
            .filter_map(|(hash, entry)| entry.as_features().map(|b| (*hash, b.clone())))
            .collect();
        return codec::encode_features(&buckets);
    }
    let ids: BTreeMap<u64, Vec<u64>> = rows
        .iter()
        .filter_map(|(id, entry)| entry.as_ids().map(|v| (*id, v.to_vec())))
        .collect();
    codec::encode_ids(&ids)
}

fn decode_rows(ty: DataType, shard_no: ShardNo, bytes: &[u8]) -> Result<BTreeMap<u64, Entry>> {
    if ty == DataType::Feature {
        return Ok(codec::decode_features(bytes)?
            .into_iter()
            .map(|(hash, bucket)| (hash, Entry::Features(bucket)))
            .collect());
    }
    Ok(codec::decode_ids(ty, shard_no, bytes)?
        .into_iter()
        .map(|(id, ids)| (id, Entry::Ids(ids)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryShardStore;
    use serde_json::json;

    fn cache(level: u32) -> ShardedCache {
        ShardedCache::new("test", ShardLevels::uniform(level))
    }

    fn packed(entries: &[(u64, Vec<u64>)]) -> Bytes {
        let rows: BTreeMap<u64, Vec<u64>> = entries.iter().cloned().collect();
        Bytes::from(codec::encode_ids(&rows).unwrap())
    }

    #[test]
    fn test_set_get() {
        let cache = cache(1);
        cache.set(DataType::Term, 17, Entry::Ids(vec![4, 5])).unwrap();
        assert_eq!(
            cache.get(DataType::Term, 17).unwrap(),
            Some(Entry::Ids(vec![4, 5]))
        );
        assert_eq!(cache.get(DataType::Term, 18).unwrap(), None);
        assert_eq!(cache.get(DataType::Grid, 17).unwrap(), None);
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let cache = cache(0);
        let err = cache.set(DataType::Grid, 1, Entry::Ids(vec![])).unwrap_err();
        assert!(matches!(
            err,
            GeodexError::InvalidValue {
                data_type: DataType::Grid,
                id: 1,
                ..
            }
        ));
        assert!(cache.set(DataType::Freq, 1, Entry::Ids(vec![])).is_err());
        assert!(cache
            .set(DataType::Feature, 1, Entry::Features(BTreeMap::new()))
            .is_err());
        assert!(cache.set(DataType::Feature, 1, Entry::Ids(vec![1])).is_err());
        assert!(cache
            .set(DataType::Grid, 1, Entry::Features(BTreeMap::new()))
            .is_err());
        cache.set(DataType::Term, 1, Entry::Ids(vec![])).unwrap();
    }

    #[test]
    fn test_lazy_shard_promoted_on_read() {
        let cache = cache(1);
        // ids 3 and 19 share shard 3 at level 1
        cache
            .load_shard(DataType::Term, packed(&[(3, vec![1]), (19, vec![2, 3])]), 3)
            .unwrap();
        assert!(cache.has(DataType::Term, 19));
        assert!(!cache.has(DataType::Term, 35));
        assert_eq!(cache.materialized_shards(DataType::Term), Vec::<u64>::new());

        assert_eq!(
            cache.get(DataType::Term, 19).unwrap(),
            Some(Entry::Ids(vec![2, 3]))
        );
        assert_eq!(cache.materialized_shards(DataType::Term), vec![3]);
        assert_eq!(cache.list(DataType::Term), vec![3, 19]);
    }

    #[test]
    fn test_set_into_lazy_shard_keeps_existing_rows() {
        let cache = cache(1);
        cache
            .load_shard(DataType::Term, packed(&[(3, vec![1])]), 3)
            .unwrap();
        cache.set(DataType::Term, 19, Entry::Ids(vec![9])).unwrap();
        assert_eq!(cache.list(DataType::Term), vec![3, 19]);
        assert_eq!(cache.get(DataType::Term, 3).unwrap(), Some(Entry::Ids(vec![1])));
    }

    #[test]
    fn test_unload_shard_is_authoritative_empty() {
        let cache = cache(1);
        cache
            .load_shard(DataType::Grid, packed(&[(2, vec![7])]), 2)
            .unwrap();
        assert!(cache.unload_shard(DataType::Grid, 2));
        assert!(!cache.has(DataType::Grid, 2));
        assert_eq!(cache.get(DataType::Grid, 2).unwrap(), None);
        assert!(cache.has_shard(DataType::Grid, 2));
        assert!(!cache.unload_shard(DataType::Grid, 2));
    }

    #[test]
    fn test_unload_type() {
        let cache = cache(0);
        assert!(!cache.unload(DataType::Term));
        cache.set(DataType::Term, 1, Entry::Ids(vec![1])).unwrap();
        cache
            .load_shard(DataType::Grid, packed(&[(1, vec![1])]), 0)
            .unwrap();
        assert!(cache.unload(DataType::Term));
        assert!(cache.unload(DataType::Grid));
        assert!(cache.list(DataType::Term).is_empty());
        assert!(!cache.has(DataType::Grid, 1));
    }

    #[test]
    fn test_pack_round_trip_through_load() {
        let source = cache(1);
        source.set(DataType::Degen, 33, Entry::Ids(vec![8, 9])).unwrap();
        source.set(DataType::Degen, 1, Entry::Ids(vec![4])).unwrap();
        let bytes = source.pack(DataType::Degen, 1).unwrap();

        let target = cache(1);
        target.load_shard(DataType::Degen, bytes, 1).unwrap();
        assert_eq!(target.list(DataType::Degen), vec![1, 33]);
        assert_eq!(
            target.get(DataType::Degen, 33).unwrap(),
            Some(Entry::Ids(vec![8, 9]))
        );
    }

    #[test]
    fn test_feature_buckets_pack_and_load() {
        let source = cache(1);
        let mut bucket = FeatureBucket::new();
        bucket.insert(5, json!({"id": 5, "text": "a"}));
        bucket.insert((1 << 20) + 5, json!({"id": (1u64 << 20) + 5, "text": "b"}));
        source
            .set(DataType::Feature, 5, Entry::Features(bucket.clone()))
            .unwrap();
        let bytes = source.pack(DataType::Feature, 5).unwrap();

        let target = cache(1);
        target.load_shard(DataType::Feature, bytes, 5).unwrap();
        assert!(target.has(DataType::Feature, 5));
        assert_eq!(
            target.get(DataType::Feature, 5).unwrap(),
            Some(Entry::Features(bucket))
        );
    }

    #[tokio::test]
    async fn test_get_all_fetches_and_dedups() {
        let store = MemoryShardStore::new();
        let source = cache(1);
        source.set(DataType::Term, 1, Entry::Ids(vec![10, 11])).unwrap();
        source.set(DataType::Term, 2, Entry::Ids(vec![11, 12])).unwrap();
        for shard_no in [1u64, 2] {
            store
                .put_shard(DataType::Term, shard_no, source.pack(DataType::Term, shard_no).unwrap())
                .await
                .unwrap();
        }

        let target = cache(1);
        let values = target
            .get_all(DataType::Term, &[1, 2, 3], &store)
            .await
            .unwrap();
        assert_eq!(values, vec![10, 11, 12]);
        // shard 3 was absent and is now an empty authoritative shard
        assert!(target.has_shard(DataType::Term, 3));

        let reads = store.read_count();
        target.get_all(DataType::Term, &[3], &store).await.unwrap();
        assert_eq!(store.read_count(), reads);
    }

    #[tokio::test]
    async fn test_get_all_grid_keeps_duplicates() {
        let store = MemoryShardStore::new();
        let cache = cache(0);
        cache.set(DataType::Grid, 1, Entry::Ids(vec![5, 6])).unwrap();
        cache.set(DataType::Grid, 2, Entry::Ids(vec![6])).unwrap();
        let values = cache
            .get_all(DataType::Grid, &[1, 2], &store)
            .await
            .unwrap();
        assert_eq!(values, vec![5, 6, 6]);
        assert!(cache
            .get_all(DataType::Feature, &[1], &store)
            .await
            .is_err());
    }

    #[test]
    fn test_entry_merge_rules() {
        let append = Entry::merge(
            Some(Entry::Ids(vec![1, 2])),
            Entry::Ids(vec![2, 3]),
            MergeRule::Append,
        );
        assert_eq!(append, Entry::Ids(vec![1, 2, 3]));

        let add = Entry::merge(Some(Entry::Ids(vec![4])), Entry::Ids(vec![3]), MergeRule::Add);
        assert_eq!(add, Entry::Ids(vec![7]));

        let replace = Entry::merge(
            Some(Entry::Ids(vec![1])),
            Entry::Ids(vec![9]),
            MergeRule::Replace,
        );
        assert_eq!(replace, Entry::Ids(vec![9]));

        let mut a = FeatureBucket::new();
        a.insert(1, json!("old"));
        a.insert(2, json!("keep"));
        let mut b = FeatureBucket::new();
        b.insert(1, json!("new"));
        let Entry::Features(merged) =
            Entry::merge(Some(Entry::Features(a)), Entry::Features(b), MergeRule::Replace)
        else {
            panic!("expected features");
        };
        assert_eq!(merged.get(&1), Some(&json!("new")));
        assert_eq!(merged.get(&2), Some(&json!("keep")));
    }
}
