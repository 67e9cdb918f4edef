pub mod bounds;
pub mod cache;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod index;
pub mod merge;
pub mod metrics;
pub mod models;
pub mod persistence;
pub mod tokenizer;

pub use bounds::{BBox, BoundsMask, IndexSet};
pub use cache::{Entry, ShardedCache};
pub use config::{IndexConfig, IndexMeta, MergeConfig, ShardLevels, TokenizerConfig};
pub use error::{GeodexError, Result};
pub use index::{FrequencyTable, IndexSource, Indexer, Patch};
pub use merge::{MergeEngine, MultiMerge};
pub use metrics::IndexMetrics;
pub use models::*;
pub use persistence::{FjallShardStore, MemoryShardStore, ShardStore};
pub use tokenizer::{FnvTokenizer, Tokenizer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
