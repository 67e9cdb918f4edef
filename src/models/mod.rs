pub mod document;
pub mod types;

pub use document::{Document, Tile};
pub use types::{
    feature_hash, shard, shard_count, DataType, DocumentId, MergeRule, PhraseId, ShardNo, TermId,
    FEATURE_HASH_BITS, MAX_SHARD_LEVEL, TOTAL_SENTINEL,
};
