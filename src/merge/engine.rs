use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::ops::merge_shards;
use super::walk::PairwiseWalk;
use crate::config::MergeConfig;
use crate::dictionary::{merge_sorted, Dictionary, DICTIONARY_SHARD};
use crate::error::{GeodexError, Result};
use crate::index::{read_dictionary, require_meta, write_meta};
use crate::metrics::IndexMetrics;
use crate::models::DataType;
use crate::persistence::{FjallShardStore, ShardIterator, ShardStore};

/// Outcome of one pairwise merge
#[derive(Clone, Debug, Default)]
pub struct MergeStats {
    /// Shards written per data type
    pub shards: BTreeMap<DataType, usize>,
    pub dictionary_entries: usize,
    /// Wall time spent per data type
    pub elapsed: BTreeMap<DataType, Duration>,
}

impl MergeStats {
    pub fn total_shards(&self) -> usize {
        self.shards.values().sum()
    }
}

/// Streaming merge of two persisted indexes into a third.
///
/// Each mergeable type is walked in shard order; shards found on one side
/// are copied as-is and shards found on both are combined. Memory is bounded
/// by `max_pending` outstanding writes.
pub struct MergeEngine {
    config: MergeConfig,
    metrics: Option<IndexMetrics>,
}

impl MergeEngine {
    pub fn new(config: MergeConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: IndexMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge `left` and `right` into `output`, then close `output`. The
    /// output is only complete once this returns `Ok`.
    pub async fn merge(
        &self,
        left: &dyn ShardStore,
        right: &dyn ShardStore,
        output: Arc<dyn ShardStore>,
    ) -> Result<MergeStats> {
        let result = self.merge_inner(left, right, output).await;
        if result.is_err() {
            if let Some(metrics) = &self.metrics {
                metrics.merges_failed.inc();
            }
        }
        result
    }

    async fn merge_inner(
        &self,
        left: &dyn ShardStore,
        right: &dyn ShardStore,
        output: Arc<dyn ShardStore>,
    ) -> Result<MergeStats> {
        self.config.validate()?;
        let left_meta = require_meta(left, "left index").await?;
        let right_meta = require_meta(right, "right index").await?;
        left_meta.check_compatible(&right_meta)?;

        let mut stats = MergeStats::default();
        for ty in DataType::MERGEABLE {
            let start = Instant::now();
            let written = self
                .merge_type(ty, left.shard_iter(ty), right.shard_iter(ty), output.clone())
                .await?;
            let elapsed = start.elapsed();
            if let Some(metrics) = &self.metrics {
                metrics.record_merge(ty, written, elapsed.as_secs_f64());
            }
            debug!(data_type = %ty, shards = written, ?elapsed, "merged type");
            stats.shards.insert(ty, written);
            stats.elapsed.insert(ty, elapsed);
        }

        let start = Instant::now();
        let keys = |d: Option<Dictionary>| d.map(|d| d.keys()).unwrap_or_default();
        let dictionary = merge_sorted(
            keys(read_dictionary(left).await?),
            keys(read_dictionary(right).await?),
        )?;
        stats.dictionary_entries = dictionary.len();
        output
            .put_shard(
                DataType::Stat,
                DICTIONARY_SHARD,
                Bytes::copy_from_slice(dictionary.as_bytes()),
            )
            .await?;
        write_meta(output.as_ref(), &left_meta.merged(&right_meta)).await?;
        stats.elapsed.insert(DataType::Stat, start.elapsed());

        output.close().await?;
        info!(
            shards = stats.total_shards(),
            dictionary = stats.dictionary_entries,
            "merge complete"
        );
        Ok(stats)
    }

    /// Walk one type of both sides and write the merged shards to `output`.
    /// Returns the number of shards written.
    pub async fn merge_type<'a>(
        &self,
        ty: DataType,
        left: Box<dyn ShardIterator + 'a>,
        right: Box<dyn ShardIterator + 'a>,
        output: Arc<dyn ShardStore>,
    ) -> Result<usize> {
        self.config.validate()?;
        let mut walk = PairwiseWalk::new(ty, left, right);
        let permits = Arc::new(Semaphore::new(self.config.max_pending));
        let mut pending: JoinSet<Result<()>> = JoinSet::new();
        let mut written = 0;

        while let Some(row) = walk.next().await? {
            let data = match (row.left, row.right) {
                (Some(l), Some(r)) => merge_shards(ty, row.shard, &l, &r)?,
                (Some(only), None) | (None, Some(only)) => only,
                (None, None) => continue,
            };
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| GeodexError::Internal(format!("write limiter closed: {}", e)))?;
            let output = output.clone();
            let shard = row.shard;
            pending.spawn(async move {
                let _permit = permit;
                output.put_shard(ty, shard, data).await
            });
            written += 1;

            // Surface write failures without waiting for the walk to end.
            while let Some(done) = pending.try_join_next() {
                flatten_write(ty, done)?;
            }
        }

        while let Some(done) = pending.join_next().await {
            flatten_write(ty, done)?;
        }
        Ok(written)
    }

    /// Merge two Fjall-backed indexes on disk into a new one at `output`.
    pub async fn merge_paths(&self, left: &Path, right: &Path, output: &Path) -> Result<MergeStats> {
        let left_store = FjallShardStore::open(left)?;
        let right_store = FjallShardStore::open(right)?;
        let output_store: Arc<dyn ShardStore> = Arc::new(FjallShardStore::open(output)?);
        debug!(
            left = %left.display(),
            right = %right.display(),
            output = %output.display(),
            "merging indexes"
        );
        self.merge(&left_store, &right_store, output_store).await
    }
}

fn flatten_write(
    ty: DataType,
    done: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match done {
        Ok(result) => result,
        Err(e) => {
            warn!(data_type = %ty, error = %e, "shard write task failed");
            Err(GeodexError::persistence(ty, None, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::{decode_ids, encode_ids};
    use crate::config::IndexConfig;
    use crate::persistence::{MemoryShardStore, VecShardIterator};

    fn grid_shard(rows: &[(u64, &[u64])]) -> Bytes {
        let rows: BTreeMap<u64, Vec<u64>> = rows.iter().map(|(k, v)| (*k, v.to_vec())).collect();
        Bytes::from(encode_ids(&rows).unwrap())
    }

    async fn seeded(meta: bool) -> MemoryShardStore {
        let store = MemoryShardStore::new();
        if meta {
            write_meta(&store, &IndexConfig::default().meta()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_merge_type_writes_union_of_shards() {
        let engine = MergeEngine::new(MergeConfig::default().with_max_pending(2));
        let left = VecShardIterator::new(
            DataType::Grid,
            vec![(1, grid_shard(&[(1, &[5])])), (3, grid_shard(&[(3, &[6])]))],
        );
        let right = VecShardIterator::new(
            DataType::Grid,
            vec![
                (3, grid_shard(&[(3, &[7])])),
                (4, grid_shard(&[(4, &[8])])),
                (8, grid_shard(&[(8, &[9])])),
            ],
        );
        let output = Arc::new(MemoryShardStore::new());
        let written = engine
            .merge_type(DataType::Grid, Box::new(left), Box::new(right), output.clone())
            .await
            .unwrap();

        assert_eq!(written, 4);
        assert_eq!(output.list_shards(DataType::Grid).await.unwrap(), vec![1, 3, 4, 8]);
        let three = output.get_shard(DataType::Grid, 3).await.unwrap().unwrap();
        assert_eq!(decode_ids(DataType::Grid, 3, &three).unwrap()[&3], vec![6, 7]);
    }

    #[tokio::test]
    async fn test_merge_type_propagates_write_failure() {
        let engine = MergeEngine::new(MergeConfig::default().with_max_pending(1));
        let left = VecShardIterator::new(
            DataType::Grid,
            (0..20).map(|s| (s, grid_shard(&[(s, &[1])]))).collect(),
        );
        let right = VecShardIterator::new(DataType::Grid, vec![]);
        let output = Arc::new(MemoryShardStore::new());
        output.set_fail_writes(true);

        let err = engine
            .merge_type(DataType::Grid, Box::new(left), Box::new(right), output)
            .await
            .unwrap_err();
        assert!(matches!(err, GeodexError::Persistence { .. }));
    }

    #[tokio::test]
    async fn test_merge_type_aborts_on_misordered_stream() {
        let engine = MergeEngine::new(MergeConfig::default());
        let left = VecShardIterator::new(
            DataType::Freq,
            vec![(2, grid_shard(&[])), (1, grid_shard(&[]))],
        );
        let right = VecShardIterator::new(DataType::Freq, vec![]);
        let err = engine
            .merge_type(
                DataType::Freq,
                Box::new(left),
                Box::new(right),
                Arc::new(MemoryShardStore::new()),
            )
            .await
            .unwrap_err();
        assert!(err.is_fatal_to_merge());
    }

    #[tokio::test]
    async fn test_zero_pending_writes_is_rejected() {
        let engine = MergeEngine::new(MergeConfig::default().with_max_pending(0));
        let left = VecShardIterator::new(DataType::Grid, vec![(1, grid_shard(&[(1, &[5])]))]);
        let right = VecShardIterator::new(DataType::Grid, vec![]);
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            engine.merge_type(
                DataType::Grid,
                Box::new(left),
                Box::new(right),
                Arc::new(MemoryShardStore::new()),
            ),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(GeodexError::InvalidRequest(_))));

        let store = seeded(true).await;
        let err = engine
            .merge(&store, &store, Arc::new(MemoryShardStore::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, GeodexError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_merge_requires_metadata() {
        let engine = MergeEngine::new(MergeConfig::default());
        let left = seeded(true).await;
        let right = seeded(false).await;
        let err = engine
            .merge(&left, &right, Arc::new(MemoryShardStore::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, GeodexError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_merge_closes_output_and_counts_failures() {
        let metrics = IndexMetrics::new().unwrap();
        let engine = MergeEngine::new(MergeConfig::default()).with_metrics(metrics.clone());
        let left = seeded(true).await;
        left.put_shard(DataType::Grid, 0, grid_shard(&[(1, &[2])])).await.unwrap();
        let right = seeded(true).await;
        let output = Arc::new(MemoryShardStore::new());

        let stats = engine.merge(&left, &right, output.clone()).await.unwrap();
        assert_eq!(stats.shards[&DataType::Grid], 1);
        assert_eq!(stats.dictionary_entries, 0);
        assert!(output.is_closed());
        assert!(require_meta(output.as_ref(), "output").await.is_ok());

        let broken = seeded(false).await;
        assert!(engine.merge(&left, &broken, output).await.is_err());
        assert_eq!(metrics.merges_failed.get(), 1.0);
    }
}
