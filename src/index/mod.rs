//! Document indexing: frequency tables, patches and the batch indexer.

pub mod frequency;
pub mod grid;
pub mod handle;
pub mod indexer;
pub mod patch;
pub mod source;

pub use frequency::FrequencyTable;
pub use grid::GridCell;
pub use handle::{
    read_dictionary, read_meta, require_meta, write_meta, IndexSource, StoreStats, META_SHARD,
};
pub use indexer::{
    significant_count, significant_terms, BatchStats, DecomposedDoc, DecomposedPhrase, IndexStats,
    Indexer,
};
pub use patch::Patch;
pub use source::{Cursor, DocumentSource, JsonLinesSource, VecSource};
