//! Per-type shard merge operators.

use bytes::{BufMut, Bytes, BytesMut};

use crate::cache::codec::{decode_ids, encode_ids};
use crate::cache::Entry;
use crate::error::{GeodexError, Result};
use crate::models::{DataType, ShardNo};

/// Combine the blobs two indexes hold for the same shard.
pub fn merge_shards(ty: DataType, shard: ShardNo, left: &[u8], right: &[u8]) -> Result<Bytes> {
    match ty {
        DataType::Freq | DataType::Grid => merge_id_shards(ty, shard, left, right),
        DataType::Feature => splice_features(shard, left, right),
        other => Err(GeodexError::InvalidRequest(format!(
            "{} shards are not merged",
            other
        ))),
    }
}

/// Row-wise merge of two id-list shards. Rows present on one side are
/// copied; rows on both sides are combined with the type's merge rule, so
/// `freq` counts are summed and `grid` cells are united.
pub fn merge_id_shards(ty: DataType, shard: ShardNo, left: &[u8], right: &[u8]) -> Result<Bytes> {
    let mut rows = decode_ids(ty, shard, left)?;
    let rule = ty.merge_rule();
    for (id, incoming) in decode_ids(ty, shard, right)? {
        let existing = rows.remove(&id).map(Entry::Ids);
        if let Entry::Ids(merged) = Entry::merge(existing, Entry::Ids(incoming), rule) {
            rows.insert(id, merged);
        }
    }
    Ok(Bytes::from(encode_ids(&rows)?))
}

/// Join two feature shards textually: drop the closing brace of the left
/// object and the opening brace of the right one. Documents are never
/// parsed. A document id present on both sides keeps the right value when
/// the shard is decoded.
pub fn splice_features(shard: ShardNo, left: &[u8], right: &[u8]) -> Result<Bytes> {
    check_object(shard, left)?;
    check_object(shard, right)?;
    if is_empty_object(left) {
        return Ok(Bytes::copy_from_slice(right));
    }
    if is_empty_object(right) {
        return Ok(Bytes::copy_from_slice(left));
    }
    let mut out = BytesMut::with_capacity(left.len() + right.len());
    out.put_slice(&left[..left.len() - 1]);
    out.put_u8(b',');
    out.put_slice(&right[1..]);
    Ok(out.freeze())
}

fn check_object(shard: ShardNo, blob: &[u8]) -> Result<()> {
    if blob.len() < 2 || blob[0] != b'{' || blob[blob.len() - 1] != b'}' {
        return Err(GeodexError::invalid_value(
            DataType::Feature,
            shard,
            "feature shard is not a bare JSON object",
        ));
    }
    Ok(())
}

fn is_empty_object(blob: &[u8]) -> bool {
    blob == b"{}"
}
