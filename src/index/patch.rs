use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use crate::cache::{Entry, FeatureBucket, ShardedCache};
use crate::error::Result;
use crate::models::{DataType, DocumentId};
use crate::persistence::ShardStore;

/// Pending cache mutations of one indexing batch: `type -> id -> value`,
/// plus the phrase texts destined for the completion dictionary.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Patch {
    entries: BTreeMap<DataType, BTreeMap<u64, Entry>>,
    dictionary: BTreeSet<String>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append ids under `id`, skipping ids already present.
    pub fn append(&mut self, ty: DataType, id: u64, values: impl IntoIterator<Item = u64>) {
        let slot = self
            .entries
            .entry(ty)
            .or_default()
            .entry(id)
            .or_insert_with(|| Entry::Ids(Vec::new()));
        if let Entry::Ids(ids) = slot {
            let mut seen: HashSet<u64> = ids.iter().copied().collect();
            ids.extend(values.into_iter().filter(|v| seen.insert(*v)));
        }
    }

    /// Add to the count under `id`.
    pub fn add(&mut self, ty: DataType, id: u64, count: u64) {
        let slot = self
            .entries
            .entry(ty)
            .or_default()
            .entry(id)
            .or_insert_with(|| Entry::Ids(vec![0]));
        if let Entry::Ids(counts) = slot {
            match counts.first_mut() {
                Some(c) => *c = c.saturating_add(count),
                None => counts.push(count),
            }
        }
    }

    /// Insert unless `id` already has a value. Returns whether it was inserted.
    pub fn insert_first(&mut self, ty: DataType, id: u64, values: Vec<u64>) -> bool {
        let rows = self.entries.entry(ty).or_default();
        if rows.contains_key(&id) {
            return false;
        }
        rows.insert(id, Entry::Ids(values));
        true
    }

    /// Place a document in the feature bucket `hash`.
    pub fn insert_feature(&mut self, hash: u64, doc_id: DocumentId, doc: serde_json::Value) {
        let slot = self
            .entries
            .entry(DataType::Feature)
            .or_default()
            .entry(hash)
            .or_insert_with(|| Entry::Features(FeatureBucket::new()));
        if let Entry::Features(bucket) = slot {
            bucket.insert(doc_id, doc);
        }
    }

    pub fn add_dictionary_entry(&mut self, text: impl Into<String>) {
        self.dictionary.insert(text.into());
    }

    pub fn get(&self, ty: DataType, id: u64) -> Option<&Entry> {
        self.entries.get(&ty).and_then(|rows| rows.get(&id))
    }

    /// Ids with a pending value for `ty`, ascending
    pub fn ids(&self, ty: DataType) -> Vec<u64> {
        self.entries
            .get(&ty)
            .map(|rows| rows.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, ty: DataType) -> usize {
        self.entries.get(&ty).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(BTreeMap::is_empty) && self.dictionary.is_empty()
    }

    pub fn types(&self) -> impl Iterator<Item = DataType> + '_ {
        self.entries.keys().copied()
    }

    pub fn dictionary(&self) -> &BTreeSet<String> {
        &self.dictionary
    }

    /// Fold another patch into this one under each type's merge rule.
    pub fn extend(&mut self, other: Patch) {
        for (ty, rows) in other.entries {
            let target = self.entries.entry(ty).or_default();
            for (id, value) in rows {
                let merged = Entry::merge(target.remove(&id), value, ty.merge_rule());
                target.insert(id, merged);
            }
        }
        self.dictionary.extend(other.dictionary);
    }

    /// Read-merge-write every entry into `cache`, one id at a time.
    ///
    /// Shards owning the touched ids are fetched from `store` first. Returns
    /// the number of entries written. On error, entries already written stay
    /// in the cache; re-applying the patch is safe.
    pub async fn apply(&self, cache: &ShardedCache, store: &dyn ShardStore) -> Result<usize> {
        let mut written = 0;
        for (ty, rows) in &self.entries {
            let ids: Vec<u64> = rows.keys().copied().collect();
            cache.ensure_loaded(*ty, &ids, store).await?;
            let rule = ty.merge_rule();
            for (id, value) in rows {
                let existing = cache.get(*ty, *id)?;
                let merged = Entry::merge(existing, value.clone(), rule);
                cache.set(*ty, *id, merged)?;
                written += 1;
            }
            debug!(cache = %cache.name(), data_type = %ty, entries = rows.len(), "applied patch rows");
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShardLevels;
    use crate::persistence::MemoryShardStore;
    use serde_json::json;

    fn cache() -> ShardedCache {
        ShardedCache::new("patch", ShardLevels::uniform(1))
    }

    fn sample(offset: u64) -> Patch {
        let mut patch = Patch::new();
        patch.append(DataType::Term, 1 + offset, [100 + offset]);
        patch.append(DataType::Grid, 2 + offset, [7, 8]);
        patch.append(DataType::Degen, 3 + offset, [9]);
        patch.insert_first(DataType::Phrase, 4 + offset, vec![1, 2]);
        patch.insert_feature(5 + offset, 5 + offset, json!({"id": 5 + offset}));
        patch.add(DataType::Freq, 0, 1);
        patch
    }

    fn snapshot(cache: &ShardedCache) -> Vec<(DataType, u64, Option<Entry>)> {
        let mut out = Vec::new();
        for ty in DataType::ALL {
            for id in cache.list(ty) {
                out.push((ty, id, cache.get(ty, id).unwrap()));
            }
        }
        out
    }

    #[test]
    fn test_patch_builders() {
        let mut patch = Patch::new();
        patch.append(DataType::Term, 1, [5, 6]);
        patch.append(DataType::Term, 1, [6, 7]);
        assert_eq!(patch.get(DataType::Term, 1), Some(&Entry::Ids(vec![5, 6, 7])));

        assert!(patch.insert_first(DataType::Phrase, 9, vec![1]));
        assert!(!patch.insert_first(DataType::Phrase, 9, vec![2]));
        assert_eq!(patch.get(DataType::Phrase, 9), Some(&Entry::Ids(vec![1])));

        patch.add(DataType::Freq, 3, 2);
        patch.add(DataType::Freq, 3, 5);
        assert_eq!(patch.get(DataType::Freq, 3), Some(&Entry::Ids(vec![7])));

        patch.insert_feature(4, 4, json!(1));
        patch.insert_feature(4, (1 << 20) + 4, json!(2));
        assert_eq!(patch.get(DataType::Feature, 4).and_then(Entry::as_features).map(|b| b.len()), Some(2));
        assert_eq!(patch.ids(DataType::Term), vec![1]);
    }

    #[tokio::test]
    async fn test_replace_types_idempotent() {
        let store = MemoryShardStore::new();
        let mut patch = Patch::new();
        patch.insert_first(DataType::Phrase, 4, vec![1, 2]);
        patch.insert_feature(5, 5, json!({"id": 5}));

        let once = cache();
        patch.apply(&once, &store).await.unwrap();
        let twice = cache();
        patch.apply(&twice, &store).await.unwrap();
        patch.apply(&twice, &store).await.unwrap();
        assert_eq!(snapshot(&once), snapshot(&twice));
    }

    #[tokio::test]
    async fn test_append_types_accumulate_in_any_order() {
        let store = MemoryShardStore::new();
        let a = sample(0);
        let b = sample(16);

        let ab = cache();
        a.apply(&ab, &store).await.unwrap();
        b.apply(&ab, &store).await.unwrap();

        let ba = cache();
        b.apply(&ba, &store).await.unwrap();
        a.apply(&ba, &store).await.unwrap();

        let mut union = a.clone();
        union.extend(b.clone());
        let joined = cache();
        union.apply(&joined, &store).await.unwrap();

        assert_eq!(snapshot(&ab), snapshot(&ba));
        assert_eq!(snapshot(&ab), snapshot(&joined));
        assert_eq!(ab.get(DataType::Freq, 0).unwrap(), Some(Entry::Ids(vec![2])));
    }

    #[tokio::test]
    async fn test_apply_merges_with_store() {
        let store = MemoryShardStore::new();
        let first = cache();
        sample(0).apply(&first, &store).await.unwrap();
        for ty in DataType::ALL {
            for shard_no in first.materialized_shards(ty) {
                store
                    .put_shard(ty, shard_no, first.pack(ty, shard_no).unwrap())
                    .await
                    .unwrap();
            }
        }

        let mut more = Patch::new();
        more.append(DataType::Grid, 2, [8, 10]);
        more.add(DataType::Freq, 0, 4);
        let second = cache();
        let written = more.apply(&second, &store).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(
            second.get(DataType::Grid, 2).unwrap(),
            Some(Entry::Ids(vec![7, 8, 10]))
        );
        assert_eq!(second.get(DataType::Freq, 0).unwrap(), Some(Entry::Ids(vec![5])));
    }
}
