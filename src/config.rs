use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::bounds::BBox;
use crate::error::{GeodexError, Result};
use crate::models::{DataType, MAX_SHARD_LEVEL};

/// Highest zoom a grid cell can encode
pub const MAX_ZOOM: u8 = 14;

/// Shard level per data type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardLevels {
    pub freq: u32,
    pub term: u32,
    pub phrase: u32,
    pub grid: u32,
    pub degen: u32,
    pub feature: u32,
    pub stat: u32,
}

impl Default for ShardLevels {
    fn default() -> Self {
        Self {
            freq: 0,
            term: 0,
            phrase: 0,
            grid: 0,
            degen: 0,
            feature: 1,
            stat: 0,
        }
    }
}

impl ShardLevels {
    /// Same level for every type except `stat`, which always has one shard set.
    pub fn uniform(level: u32) -> Self {
        Self {
            freq: level,
            term: level,
            phrase: level,
            grid: level,
            degen: level,
            feature: level,
            stat: 0,
        }
    }

    pub fn level(&self, ty: DataType) -> u32 {
        match ty {
            DataType::Freq => self.freq,
            DataType::Term => self.term,
            DataType::Phrase => self.phrase,
            DataType::Grid => self.grid,
            DataType::Degen => self.degen,
            DataType::Feature => self.feature,
            DataType::Stat => self.stat,
        }
    }

    pub fn with_level(mut self, ty: DataType, level: u32) -> Self {
        let slot = match ty {
            DataType::Freq => &mut self.freq,
            DataType::Term => &mut self.term,
            DataType::Phrase => &mut self.phrase,
            DataType::Grid => &mut self.grid,
            DataType::Degen => &mut self.degen,
            DataType::Feature => &mut self.feature,
            DataType::Stat => &mut self.stat,
        };
        *slot = level;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for ty in DataType::ALL {
            let level = self.level(ty);
            if level > MAX_SHARD_LEVEL {
                return Err(GeodexError::InvalidRequest(format!(
                    "shard level {} for {} exceeds {}",
                    level, ty, MAX_SHARD_LEVEL
                )));
            }
        }
        Ok(())
    }
}

/// Index build configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub shard_levels: ShardLevels,
    /// Zoom at which document tiles are expected
    pub zoom: u8,
    /// Declared geographic coverage, used by the bounds mask
    pub bounds: BBox,
    /// Documents per indexing batch
    pub batch_size: usize,
    pub tokenizer: TokenizerConfig,
    pub merge: MergeConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            shard_levels: ShardLevels::default(),
            zoom: 6,
            bounds: BBox::WORLD,
            batch_size: 10_000,
            tokenizer: TokenizerConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

impl IndexConfig {
    pub fn with_shard_levels(mut self, levels: ShardLevels) -> Self {
        self.shard_levels = levels;
        self
    }

    pub fn with_zoom(mut self, zoom: u8) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_bounds(mut self, bounds: BBox) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_merge(mut self, merge: MergeConfig) -> Self {
        self.merge = merge;
        self
    }

    /// Load a JSON config file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let config: IndexConfig = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.shard_levels.validate()?;
        if self.zoom > MAX_ZOOM {
            return Err(GeodexError::InvalidRequest(format!(
                "zoom {} exceeds {}",
                self.zoom, MAX_ZOOM
            )));
        }
        if self.batch_size == 0 {
            return Err(GeodexError::InvalidRequest(
                "batch_size must be at least 1".to_string(),
            ));
        }
        self.merge.validate()
    }

    /// Metadata persisted with an index built from this config
    pub fn meta(&self) -> IndexMeta {
        IndexMeta {
            shard_levels: self.shard_levels,
            zoom: self.zoom,
            bounds: self.bounds,
        }
    }
}

/// Tokenizer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    pub lowercase: bool,
    pub min_token_length: usize,
    pub max_token_length: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            lowercase: true,
            min_token_length: 1,
            max_token_length: 64,
        }
    }
}

/// Streaming merge configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// In-flight shard writes before the merge walk waits
    pub max_pending: usize,
    /// Concurrent pairwise merges in a multi-way merge
    pub workers: usize,
    /// Parent directory for intermediate merge outputs
    pub scratch_dir: PathBuf,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_pending: 1000,
            workers: 4,
            scratch_dir: std::env::temp_dir().join("geodex-merge"),
        }
    }
}

impl MergeConfig {
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Use one worker per available CPU
    pub fn with_cpu_workers(mut self) -> Self {
        self.workers = num_cpus::get();
        self
    }

    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = dir;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_pending == 0 || self.workers == 0 {
            return Err(GeodexError::InvalidRequest(
                "merge max_pending and workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Build parameters persisted in `stat` shard 1 of every index
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub shard_levels: ShardLevels,
    pub zoom: u8,
    pub bounds: BBox,
}

impl IndexMeta {
    /// Two indexes can be merged only if their shards line up.
    pub fn check_compatible(&self, other: &IndexMeta) -> Result<()> {
        if self.shard_levels != other.shard_levels {
            return Err(GeodexError::IncompatibleIndexes(format!(
                "shard levels differ: {:?} vs {:?}",
                self.shard_levels, other.shard_levels
            )));
        }
        if self.zoom != other.zoom {
            return Err(GeodexError::IncompatibleIndexes(format!(
                "zoom differs: {} vs {}",
                self.zoom, other.zoom
            )));
        }
        Ok(())
    }

    /// Metadata of the merge of two compatible indexes
    pub fn merged(&self, other: &IndexMeta) -> IndexMeta {
        IndexMeta {
            shard_levels: self.shard_levels,
            zoom: self.zoom,
            bounds: self.bounds.union(&other.bounds),
        }
    }
}
