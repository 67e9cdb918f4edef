//! Two-pass batch indexer.
//!
//! Pass one decomposes every document into phrases and terms and settles the
//! frequency table: batch counts merged with the persisted `freq` shards of
//! every touched term. No weight is computed before that table is complete.
//! Pass two walks the documents again and builds the [`Patch`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use ordered_float::OrderedFloat;
use tracing::{debug, info, warn};

use super::frequency::FrequencyTable;
use super::grid::GridCell;
use super::handle::IndexSource;
use super::patch::Patch;
use super::source::DocumentSource;
use crate::cache::ShardedCache;
use crate::error::Result;
use crate::metrics::IndexMetrics;
use crate::models::{DataType, Document, PhraseId, TermId};
use crate::persistence::ShardStore;
use crate::tokenizer::{Token, Tokenizer};

/// One phrase of a document after tokenization
#[derive(Clone, Debug, PartialEq)]
pub struct DecomposedPhrase {
    pub id: PhraseId,
    pub terms: Vec<Token>,
    pub text: String,
}

impl DecomposedPhrase {
    pub fn term_ids(&self) -> Vec<TermId> {
        self.terms.iter().map(|t| t.id).collect()
    }
}

/// A document and its phrases
#[derive(Clone, Debug)]
pub struct DecomposedDoc<'a> {
    pub doc: &'a Document,
    pub phrases: Vec<DecomposedPhrase>,
}

/// Counters for one batch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub documents: usize,
    pub skipped: usize,
    pub phrases: usize,
    pub entries: usize,
}

/// Totals across every batch of a document source
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub batches: usize,
    pub documents: usize,
    pub skipped: usize,
    pub entries: usize,
}

/// Number of terms kept in the `term` index for a phrase of `len` terms.
pub fn significant_count(len: usize) -> usize {
    if len > 3 {
        2
    } else {
        1
    }
}

/// Highest-weight terms of a phrase. Ties keep phrase order.
pub fn significant_terms<'a>(terms: &'a [Token], freq: &FrequencyTable) -> Vec<&'a Token> {
    let mut ranked: Vec<&Token> = terms.iter().collect();
    ranked.sort_by_key(|t| std::cmp::Reverse(OrderedFloat(freq.weight(t.id))));
    ranked.truncate(significant_count(terms.len()));
    ranked
}

pub struct Indexer {
    tokenizer: Arc<dyn Tokenizer>,
    metrics: Option<IndexMetrics>,
}

impl Indexer {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            tokenizer,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: IndexMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Split each document's text on commas and tokenize every phrase.
    /// Phrases that yield no terms are dropped.
    pub fn decompose<'a>(&self, docs: &'a [Document]) -> Vec<DecomposedDoc<'a>> {
        docs.iter()
            .map(|doc| {
                let phrases = doc
                    .phrases()
                    .filter_map(|raw| {
                        let terms = self.tokenizer.tokenize(raw);
                        if terms.is_empty() {
                            return None;
                        }
                        Some(DecomposedPhrase {
                            id: self.tokenizer.phrase_id(&terms),
                            text: self.tokenizer.phrase_text(&terms),
                            terms,
                        })
                    })
                    .collect();
                DecomposedDoc { doc, phrases }
            })
            .collect()
    }

    /// Both passes over a batch, reading persisted frequencies through
    /// `cache`. The cache is not modified except for shards it fetches.
    pub async fn build_patch(
        &self,
        docs: &[Document],
        cache: &ShardedCache,
        store: &dyn ShardStore,
    ) -> Result<Patch> {
        let decomposed = self.decompose(docs);
        self.build_patch_decomposed(&decomposed, cache, store).await
    }

    async fn build_patch_decomposed(
        &self,
        decomposed: &[DecomposedDoc<'_>],
        cache: &ShardedCache,
        store: &dyn ShardStore,
    ) -> Result<Patch> {
        let term_lists: Vec<Vec<TermId>> = decomposed
            .iter()
            .flat_map(|d| d.phrases.iter().map(DecomposedPhrase::term_ids))
            .collect();
        let batch = FrequencyTable::tally(term_lists.iter().map(Vec::as_slice));
        let persisted = FrequencyTable::load_persisted(&batch.term_ids(), cache, store).await?;
        let merged = batch.merge_with_persisted(&persisted);
        debug!(
            terms = batch.len(),
            total = merged.total(),
            "frequency table settled"
        );
        self.build_patch_with(decomposed, &batch, &merged)
    }

    /// Second pass: build the patch from decomposed documents, the batch's
    /// own counts and the merged frequency table used for weights.
    pub fn build_patch_with(
        &self,
        decomposed: &[DecomposedDoc<'_>],
        batch: &FrequencyTable,
        weights: &FrequencyTable,
    ) -> Result<Patch> {
        let mut patch = Patch::new();
        let mut expanded: HashSet<TermId> = HashSet::new();

        for item in decomposed {
            if item.phrases.is_empty() {
                continue;
            }
            let doc = item.doc;
            let hash = doc.hash();

            let mut cells = Vec::with_capacity(doc.tiles.len());
            for tile in &doc.tiles {
                match GridCell::from_tile(tile, hash) {
                    Some(cell) => cells.push(cell.encode()),
                    None => warn!(doc = doc.id, tile = %tile, "dropping tile out of range"),
                }
            }

            patch.insert_feature(hash, doc.id, serde_json::to_value(doc)?);

            for phrase in &item.phrases {
                patch.insert_first(DataType::Phrase, phrase.id, phrase.term_ids());
                if !cells.is_empty() {
                    patch.append(DataType::Grid, phrase.id, cells.iter().copied());
                }
                for term in significant_terms(&phrase.terms, weights) {
                    patch.append(DataType::Term, term.id, [phrase.id]);
                }
                for term in &phrase.terms {
                    if !expanded.insert(term.id) {
                        continue;
                    }
                    for (variant, relation) in self.tokenizer.degenerate_variants(term) {
                        patch.append(DataType::Degen, variant, [relation]);
                    }
                }
                patch.add_dictionary_entry(phrase.text.clone());
            }
        }

        for (id, count) in batch.iter() {
            patch.add(DataType::Freq, id, count);
        }
        Ok(patch)
    }

    /// Index one batch into `index`: build the patch, then apply it.
    pub async fn index_batch(
        &self,
        docs: &[Document],
        index: &mut IndexSource,
    ) -> Result<BatchStats> {
        let start = Instant::now();
        let decomposed = self.decompose(docs);
        let skipped = decomposed.iter().filter(|d| d.phrases.is_empty()).count();
        let patch = self
            .build_patch_decomposed(&decomposed, index.cache(), index.store())
            .await?;
        let entries = index.apply_patch(&patch).await?;

        let stats = BatchStats {
            documents: docs.len() - skipped,
            skipped,
            phrases: patch.len(DataType::Phrase),
            entries,
        };
        if let Some(metrics) = &self.metrics {
            metrics.documents_indexed.inc_by(stats.documents as f64);
            metrics.entries_applied.inc_by(entries as f64);
            metrics.batch_latency.observe(start.elapsed().as_secs_f64());
        }
        debug!(index = %index.name(), ?stats, "batch indexed");
        Ok(stats)
    }

    /// Drain `source` in batches of `batch_size` documents, then persist the
    /// index.
    pub async fn index_source(
        &self,
        source: &mut dyn DocumentSource,
        index: &mut IndexSource,
        batch_size: usize,
    ) -> Result<IndexStats> {
        let mut stats = IndexStats::default();
        let mut cursor = None;
        loop {
            let (docs, next) = source.next_batch(cursor, batch_size.max(1)).await?;
            if !docs.is_empty() {
                let batch = self.index_batch(&docs, index).await?;
                stats.batches += 1;
                stats.documents += batch.documents;
                stats.skipped += batch.skipped;
                stats.entries += batch.entries;
            }
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        index.store_all().await?;
        info!(
            index = %index.name(),
            batches = stats.batches,
            documents = stats.documents,
            "indexing finished"
        );
        Ok(stats)
    }
}
