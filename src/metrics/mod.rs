use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

use crate::models::DataType;

/// Prometheus metrics for indexing and merging
#[derive(Clone)]
pub struct IndexMetrics {
    // Counters
    pub documents_indexed: Counter,
    pub entries_applied: Counter,
    pub shards_fetched: Counter,
    pub shards_merged: CounterVec,
    pub merges_failed: Counter,

    // Histograms
    pub batch_latency: Histogram,
    pub merge_latency: HistogramVec,

    registry: Arc<Registry>,
}

impl IndexMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let documents_indexed = Counter::with_opts(Opts::new(
            "geodex_documents_indexed_total",
            "Total number of documents indexed",
        ))?;
        registry.register(Box::new(documents_indexed.clone()))?;

        let entries_applied = Counter::with_opts(Opts::new(
            "geodex_patch_entries_applied_total",
            "Total number of patch entries written to the cache",
        ))?;
        registry.register(Box::new(entries_applied.clone()))?;

        let shards_fetched = Counter::with_opts(Opts::new(
            "geodex_shards_fetched_total",
            "Shards read from the backend on a cache miss",
        ))?;
        registry.register(Box::new(shards_fetched.clone()))?;

        let shards_merged = CounterVec::new(
            Opts::new(
                "geodex_shards_merged_total",
                "Shards written by the streaming merge, by data type",
            ),
            &["type"],
        )?;
        registry.register(Box::new(shards_merged.clone()))?;

        let merges_failed = Counter::with_opts(Opts::new(
            "geodex_merges_failed_total",
            "Pairwise merges that ended in an error",
        ))?;
        registry.register(Box::new(merges_failed.clone()))?;

        let batch_latency = Histogram::with_opts(
            HistogramOpts::new("geodex_batch_latency_seconds", "Indexing batch latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(batch_latency.clone()))?;

        let merge_latency = HistogramVec::new(
            HistogramOpts::new("geodex_merge_latency_seconds", "Per-type merge latency")
                .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
            &["type"],
        )?;
        registry.register(Box::new(merge_latency.clone()))?;

        Ok(Self {
            documents_indexed,
            entries_applied,
            shards_fetched,
            shards_merged,
            merges_failed,
            batch_latency,
            merge_latency,
            registry: Arc::new(registry),
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Record the outcome of merging one data type
    pub fn record_merge(&self, ty: DataType, shards: usize, duration_secs: f64) {
        self.shards_merged
            .with_label_values(&[ty.as_str()])
            .inc_by(shards as f64);
        self.merge_latency
            .with_label_values(&[ty.as_str()])
            .observe(duration_secs);
    }
}
