//! Data types, shard numbering and per-type merge rules.
//!
//! Every id maps to a shard through [`shard`], which depends only on the
//! shard level and the id. Two indexes built independently with the same
//! levels therefore place the same id in the same shard, which is what the
//! streaming merge relies on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Shard number within a data type
pub type ShardNo = u64;

/// Term, phrase and feature identifiers
pub type TermId = u64;
pub type PhraseId = u64;
pub type DocumentId = u64;

/// Id 0 in the `freq` type holds the total count, never a real term.
pub const TOTAL_SENTINEL: TermId = 0;

/// Highest shard level accepted by configuration (16^6 shards)
pub const MAX_SHARD_LEVEL: u32 = 6;

/// Bits of a document id kept as its feature hash
pub const FEATURE_HASH_BITS: u32 = 20;

/// Shard owning `id` at `level`: `id mod 16^level`, always 0 at level 0.
/// The low bits pick the shard, not the high ones: ids `0..16^level` land
/// in distinct shards and no level ever yields more than `16^level`.
#[inline]
pub fn shard(level: u32, id: u64) -> ShardNo {
    if level == 0 {
        0
    } else {
        id & (shard_count(level) - 1)
    }
}

/// Number of shards for a level (`16^level`).
#[inline]
pub fn shard_count(level: u32) -> u64 {
    1u64 << (level * 4)
}

/// Feature cache key for a document id
#[inline]
pub fn feature_hash(id: DocumentId) -> u64 {
    id & ((1u64 << FEATURE_HASH_BITS) - 1)
}

/// Independently sharded namespaces of an index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Freq,
    Term,
    Phrase,
    Grid,
    Degen,
    Feature,
    Stat,
}

/// How a patch value combines with an existing cache value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeRule {
    /// Union of id lists, existing order first
    Append,
    /// Incoming value wins
    Replace,
    /// Elementwise sum of counts
    Add,
}

impl DataType {
    pub const ALL: [DataType; 7] = [
        DataType::Freq,
        DataType::Term,
        DataType::Phrase,
        DataType::Grid,
        DataType::Degen,
        DataType::Feature,
        DataType::Stat,
    ];

    /// Types combined by the streaming merge. `term`, `phrase` and `degen`
    /// depend on global frequency weights and are rebuilt rather than merged.
    pub const MERGEABLE: [DataType; 3] = [DataType::Freq, DataType::Grid, DataType::Feature];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Freq => "freq",
            DataType::Term => "term",
            DataType::Phrase => "phrase",
            DataType::Grid => "grid",
            DataType::Degen => "degen",
            DataType::Feature => "feature",
            DataType::Stat => "stat",
        }
    }

    pub fn merge_rule(&self) -> MergeRule {
        match self {
            DataType::Term | DataType::Grid | DataType::Degen => MergeRule::Append,
            DataType::Phrase | DataType::Feature | DataType::Stat => MergeRule::Replace,
            DataType::Freq => MergeRule::Add,
        }
    }

    /// Whether an empty value may be stored under an id
    pub fn allows_empty(&self) -> bool {
        !matches!(self, DataType::Grid | DataType::Freq | DataType::Feature)
    }

    pub fn is_mergeable(&self) -> bool {
        Self::MERGEABLE.contains(self)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown data type '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_level_zero_is_single_shard() {
        for id in [0u64, 1, 15, 16, u64::MAX] {
            assert_eq!(shard(0, id), 0);
        }
    }

    #[test]
    fn test_shard_is_deterministic_and_bounded() {
        for level in 1..=MAX_SHARD_LEVEL {
            for id in [0u64, 7, 16, 255, 4097, 1 << 40, u64::MAX] {
                let s = shard(level, id);
                assert_eq!(s, shard(level, id));
                assert!(s < shard_count(level));
                assert_eq!(s, id % 16u64.pow(level));
            }
        }
    }

    #[test]
    fn test_shard_uses_low_bits() {
        assert_eq!(shard(1, 0x1F), 0xF);
        assert_eq!(shard(2, 0xABC), 0xBC);
        assert_eq!(shard(1, 16), 0);
        let small: std::collections::BTreeSet<ShardNo> = (0..16).map(|id| shard(1, id)).collect();
        assert_eq!(small.len(), 16);
    }

    #[test]
    fn test_feature_shard_matches_document_shard() {
        // Feature buckets are keyed by hash, documents in a shard by id.
        for level in 0..=5 {
            for id in [3u64, 1 << 21, (1 << 33) + 99] {
                assert_eq!(shard(level, feature_hash(id)), shard(level, id));
            }
        }
    }

    #[test]
    fn test_merge_rules() {
        assert_eq!(DataType::Term.merge_rule(), MergeRule::Append);
        assert_eq!(DataType::Grid.merge_rule(), MergeRule::Append);
        assert_eq!(DataType::Degen.merge_rule(), MergeRule::Append);
        assert_eq!(DataType::Phrase.merge_rule(), MergeRule::Replace);
        assert_eq!(DataType::Feature.merge_rule(), MergeRule::Replace);
        assert_eq!(DataType::Freq.merge_rule(), MergeRule::Add);
        assert!(!DataType::Grid.allows_empty());
        assert!(DataType::Term.allows_empty());
    }

    #[test]
    fn test_data_type_round_trip_str() {
        for ty in DataType::ALL {
            assert_eq!(ty.as_str().parse::<DataType>().unwrap(), ty);
        }
        assert!("postings".parse::<DataType>().is_err());
    }
}
