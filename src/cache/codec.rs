//! Shard blob encoding.
//!
//! Id-list types are packed with bincode as a key vector followed by the
//! value vectors, so the key set of a lazy shard can be read without
//! decoding the values. Feature shards are a single-line JSON object keyed
//! by document id, which keeps them spliceable by the merge.

use std::collections::BTreeMap;

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use crate::error::{GeodexError, Result};
use crate::models::{feature_hash, DataType, ShardNo};

#[derive(Serialize, Deserialize)]
struct PackedShard {
    keys: Vec<u64>,
    values: Vec<Vec<u64>>,
}

/// Documents of one feature bucket, keyed by document id
pub type FeatureBucket = BTreeMap<u64, serde_json::Value>;

pub fn encode_ids(rows: &BTreeMap<u64, Vec<u64>>) -> Result<Vec<u8>> {
    let packed = PackedShard {
        keys: rows.keys().copied().collect(),
        values: rows.values().cloned().collect(),
    };
    Ok(bincode::serialize(&packed)?)
}

pub fn decode_ids(ty: DataType, shard: ShardNo, bytes: &[u8]) -> Result<BTreeMap<u64, Vec<u64>>> {
    let packed: PackedShard = bincode::deserialize(bytes)?;
    if packed.keys.len() != packed.values.len() {
        return Err(GeodexError::persistence(
            ty,
            Some(shard),
            format!(
                "corrupt shard: {} keys for {} values",
                packed.keys.len(),
                packed.values.len()
            ),
        ));
    }
    Ok(packed.keys.into_iter().zip(packed.values).collect())
}

/// Key set of an id-list shard. Trailing value bytes are ignored.
pub fn scan_id_keys(bytes: &[u8]) -> Result<Vec<u64>> {
    Ok(bincode::deserialize::<Vec<u64>>(bytes)?)
}

/// Flatten buckets into one `{doc_id: doc}` object.
pub fn encode_features(buckets: &BTreeMap<u64, FeatureBucket>) -> Result<Vec<u8>> {
    let flat: BTreeMap<u64, &serde_json::Value> = buckets
        .values()
        .flat_map(|bucket| bucket.iter().map(|(id, doc)| (*id, doc)))
        .collect();
    Ok(serde_json::to_vec(&flat)?)
}

/// Regroup a flat feature object into buckets keyed by feature hash.
pub fn decode_features(bytes: &[u8]) -> Result<BTreeMap<u64, FeatureBucket>> {
    let flat: BTreeMap<u64, serde_json::Value> = serde_json::from_slice(bytes)?;
    let mut buckets: BTreeMap<u64, FeatureBucket> = BTreeMap::new();
    for (id, doc) in flat {
        buckets.entry(feature_hash(id)).or_default().insert(id, doc);
    }
    Ok(buckets)
}

/// Feature hashes present in a feature shard, without keeping the documents.
pub fn scan_feature_keys(bytes: &[u8]) -> Result<Vec<u64>> {
    let flat: BTreeMap<u64, IgnoredAny> = serde_json::from_slice(bytes)?;
    let mut keys: Vec<u64> = flat.keys().map(|id| feature_hash(*id)).collect();
    keys.sort_unstable();
    keys.dedup();
    Ok(keys)
}
