//! Corpus term frequencies.
//!
//! Id [`TOTAL_SENTINEL`] holds the running total that weights are computed
//! against. It grows by one for every phrase occurrence, so a term shared by
//! every phrase ends up with the lowest weight.

use std::collections::BTreeMap;

use crate::cache::{Entry, ShardedCache};
use crate::error::Result;
use crate::models::{DataType, TermId, TOTAL_SENTINEL};
use crate::persistence::ShardStore;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrequencyTable {
    counts: BTreeMap<TermId, u64>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count every term occurrence across the given phrases. The total
    /// advances once per phrase.
    pub fn tally<'a, I>(phrases: I) -> Self
    where
        I: IntoIterator<Item = &'a [TermId]>,
    {
        let mut table = Self::new();
        for terms in phrases {
            if terms.is_empty() {
                continue;
            }
            *table.counts.entry(TOTAL_SENTINEL).or_insert(0) += 1;
            for term in terms {
                *table.counts.entry(*term).or_insert(0) += 1;
            }
        }
        table
    }

    /// Read the persisted counts of `ids`, loading their `freq` shards first.
    /// Every shard is in memory before any count is read.
    pub async fn load_persisted(
        ids: &[TermId],
        cache: &ShardedCache,
        store: &dyn ShardStore,
    ) -> Result<Self> {
        cache.ensure_loaded(DataType::Freq, ids, store).await?;
        let mut table = Self::new();
        for id in ids {
            if let Some(Entry::Ids(values)) = cache.get(DataType::Freq, *id)? {
                if let Some(count) = values.first() {
                    table.counts.insert(*id, *count);
                }
            }
        }
        Ok(table)
    }

    /// Counts after adding this batch to `persisted`, for the ids this batch
    /// touches only.
    pub fn merge_with_persisted(&self, persisted: &FrequencyTable) -> FrequencyTable {
        let counts = self
            .counts
            .iter()
            .map(|(id, count)| (*id, count.saturating_add(persisted.get(*id))))
            .collect();
        FrequencyTable { counts }
    }

    /// Overwrite counts with those of `other`.
    pub fn overlay(&mut self, other: &FrequencyTable) {
        self.counts
            .extend(other.counts.iter().map(|(id, count)| (*id, *count)));
    }

    pub fn get(&self, id: TermId) -> u64 {
        self.counts.get(&id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.get(TOTAL_SENTINEL)
    }

    /// `ln(1 + total / freq)`; rarer terms weigh more.
    pub fn weight(&self, term: TermId) -> f64 {
        let freq = self.get(term).max(1) as f64;
        (1.0 + self.total() as f64 / freq).ln()
    }

    /// Touched ids, sentinel included, ascending
    pub fn term_ids(&self) -> Vec<TermId> {
        self.counts.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TermId, u64)> + '_ {
        self.counts.iter().map(|(id, count)| (*id, *count))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShardLevels;
    use crate::persistence::MemoryShardStore;

    #[test]
    fn test_tally_counts_occurrences() {
        let phrases: Vec<Vec<TermId>> = vec![vec![10, 11], vec![10, 12, 10], vec![]];
        let table = FrequencyTable::tally(phrases.iter().map(Vec::as_slice));
        assert_eq!(table.total(), 2);
        assert_eq!(table.get(10), 3);
        assert_eq!(table.get(11), 1);
        assert_eq!(table.get(99), 0);
        assert_eq!(table.term_ids(), vec![0, 10, 11, 12]);
    }

    #[test]
    fn test_weight_favours_rare_terms() {
        let phrases: Vec<Vec<TermId>> = vec![vec![1, 2], vec![1, 3], vec![1, 4]];
        let table = FrequencyTable::tally(phrases.iter().map(Vec::as_slice));
        assert!(table.weight(2) > table.weight(1));
        assert!((table.weight(2) - 4f64.ln()).abs() < 1e-12);
        // unseen terms are treated as seen once
        assert_eq!(table.weight(99), table.weight(2));
    }

    #[test]
    fn test_incremental_merge_equals_one_shot() {
        let batches: Vec<Vec<Vec<TermId>>> = vec![
            vec![vec![1, 2], vec![2, 3]],
            vec![vec![3, 4]],
            vec![vec![1], vec![5, 1, 2]],
        ];

        let mut persisted = FrequencyTable::new();
        for batch in &batches {
            let tallied = FrequencyTable::tally(batch.iter().map(Vec::as_slice));
            let merged = tallied.merge_with_persisted(&persisted);
            persisted.overlay(&merged);
        }

        let all: Vec<&[TermId]> = batches.iter().flatten().map(Vec::as_slice).collect();
        let one_shot = FrequencyTable::tally(all).merge_with_persisted(&FrequencyTable::new());
        assert_eq!(persisted, one_shot);
    }

    #[test]
    fn test_merge_only_touches_batch_ids() {
        let persisted = FrequencyTable::tally([&[7u64, 8][..]]);
        let batch = FrequencyTable::tally([&[8u64][..]]);
        let merged = batch.merge_with_persisted(&persisted);
        assert_eq!(merged.term_ids(), vec![0, 8]);
        assert_eq!(merged.get(8), 2);
        assert_eq!(merged.total(), 2);
    }

    #[tokio::test]
    async fn test_load_persisted_from_store() {
        let levels = ShardLevels::uniform(1);
        let source = ShardedCache::new("src", levels);
        source.set(DataType::Freq, 0, Entry::Ids(vec![40])).unwrap();
        source.set(DataType::Freq, 17, Entry::Ids(vec![3])).unwrap();
        let store = MemoryShardStore::new();
        for shard_no in source.materialized_shards(DataType::Freq) {
            store
                .put_shard(DataType::Freq, shard_no, source.pack(DataType::Freq, shard_no).unwrap())
                .await
                .unwrap();
        }

        let cache = ShardedCache::new("dst", levels);
        let table = FrequencyTable::load_persisted(&[0, 17, 18], &cache, &store)
            .await
            .unwrap();
        assert_eq!(table.total(), 40);
        assert_eq!(table.get(17), 3);
        assert_eq!(table.get(18), 0);
        assert_eq!(table.len(), 2);
    }
}
