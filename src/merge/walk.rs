//! Full outer join of two ordered shard streams.

use bytes::Bytes;

use crate::error::{GeodexError, Result};
use crate::models::{DataType, ShardNo};
use crate::persistence::ShardIterator;

/// One step of the walk: a shard number and the data each side holds for it
#[derive(Clone, Debug, PartialEq)]
pub struct MergeRow {
    pub shard: ShardNo,
    pub left: Option<Bytes>,
    pub right: Option<Bytes>,
}

struct Side<'a> {
    iter: Box<dyn ShardIterator + 'a>,
    head: Option<(ShardNo, Bytes)>,
    last: Option<ShardNo>,
    exhausted: bool,
}

impl<'a> Side<'a> {
    fn new(iter: Box<dyn ShardIterator + 'a>) -> Self {
        Self {
            iter,
            head: None,
            last: None,
            exhausted: false,
        }
    }

    /// Shard number at the head of this side, fetching it if needed.
    async fn peek(&mut self, ty: DataType) -> Result<Option<ShardNo>> {
        if self.head.is_none() && !self.exhausted {
            match self.iter.next().await? {
                Some((shard, data)) => {
                    if let Some(previous) = self.last {
                        if shard <= previous {
                            return Err(GeodexError::MisorderedShardStream {
                                data_type: ty,
                                previous,
                                current: shard,
                            });
                        }
                    }
                    self.head = Some((shard, data));
                }
                None => self.exhausted = true,
            }
        }
        Ok(self.head.as_ref().map(|(shard, _)| *shard))
    }

    fn take(&mut self) -> Option<Bytes> {
        let (shard, data) = self.head.take()?;
        self.last = Some(shard);
        Some(data)
    }
}

/// Walks two ascending shard streams in lockstep. Each shard number is
/// emitted once, carrying the data of every side that has it. Work is
/// linear in the number of shards on both sides.
pub struct PairwiseWalk<'a> {
    ty: DataType,
    left: Side<'a>,
    right: Side<'a>,
}

impl<'a> PairwiseWalk<'a> {
    pub fn new(
        ty: DataType,
        left: Box<dyn ShardIterator + 'a>,
        right: Box<dyn ShardIterator + 'a>,
    ) -> Self {
        Self {
            ty,
            left: Side::new(left),
            right: Side::new(right),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.ty
    }

    /// Next row, or `None` once both sides are exhausted. A side that yields
    /// a shard number not above its previous one aborts the walk.
    pub async fn next(&mut self) -> Result<Option<MergeRow>> {
        let left = self.left.peek(self.ty).await?;
        let right = self.right.peek(self.ty).await?;
        let (shard, take_left, take_right) = match (left, right) {
            (None, None) => return Ok(None),
            (Some(l), None) => (l, true, false),
            (None, Some(r)) => (r, false, true),
            (Some(l), Some(r)) if l < r => (l, true, false),
            (Some(l), Some(r)) if r < l => (r, false, true),
            (Some(l), Some(_)) => (l, true, true),
        };
        Ok(Some(MergeRow {
            shard,
            left: if take_left { self.left.take() } else { None },
            right: if take_right { self.right.take() } else { None },
        }))
    }
}
