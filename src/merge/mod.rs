//! Cross-index merging: the ordered pairwise walk, per-type shard
//! operators, the streaming engine and the multi-way merge tree.

pub mod engine;
pub mod multi;
pub mod ops;
pub mod walk;
pub mod worker;

pub use engine::{MergeEngine, MergeStats};
pub use multi::{MultiMerge, MultiMergeStats};
pub use ops::{merge_shards, splice_features};
pub use walk::{MergeRow, PairwiseWalk};
pub use worker::{InProcessWorker, MergeJob, MergeWorker, ProcessWorker};
