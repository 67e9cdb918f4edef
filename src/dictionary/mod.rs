//! Phrase completion dictionary
//!
//! Phrase texts are kept in an FST set persisted as `stat` shard 0. Two
//! dictionaries merge with a two-pointer walk over their sorted entries, so
//! no entry is visited twice and the output is built in one pass.

use std::collections::BTreeSet;
use std::iter::Peekable;

use fst::automaton::{Automaton, Str};
use fst::{IntoStreamer, Set, SetBuilder, Streamer};

use crate::error::{GeodexError, Result};
use crate::models::{DataType, ShardNo};

/// `stat` shard holding the dictionary
pub const DICTIONARY_SHARD: ShardNo = 0;

/// Immutable completion dictionary backed by an FST set
pub struct Dictionary {
    set: Set<Vec<u8>>,
}

impl Dictionary {
    /// Load from the bytes of a persisted FST
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let set = Set::new(bytes)
            .map_err(|e| GeodexError::persistence(DataType::Stat, Some(DICTIONARY_SHARD), e))?;
        Ok(Self { set })
    }

    pub fn empty() -> Result<Self> {
        DictionaryWriter::new().finish()
    }

    pub fn contains(&self, text: &str) -> bool {
        self.set.contains(text)
    }

    /// All entries starting with `prefix`, sorted
    pub fn prefix_search(&self, prefix: &str) -> Vec<String> {
        let matcher = Str::new(prefix).starts_with();
        let mut stream = self.set.search(matcher).into_stream();
        let mut out = Vec::new();
        while let Some(key) = stream.next() {
            if let Ok(text) = std::str::from_utf8(key) {
                out.push(text.to_string());
            }
        }
        out
    }

    /// All entries as raw keys, sorted
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.set.stream().into_bytes()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Raw FST bytes for persistence
    pub fn as_bytes(&self) -> &[u8] {
        self.set.as_fst().as_bytes()
    }
}

/// Collects phrase texts for one index build.
#[derive(Debug, Default)]
pub struct DictionaryWriter {
    entries: BTreeSet<String>,
}

impl DictionaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a phrase text. Returns false if it was already present.
    pub fn insert(&mut self, text: &str) -> Result<bool> {
        if text.is_empty() {
            return Err(GeodexError::invalid_value(
                DataType::Stat,
                DICTIONARY_SHARD,
                "empty dictionary entry",
            ));
        }
        Ok(self.entries.insert(text.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finish(self) -> Result<Dictionary> {
        let mut builder = SetBuilder::memory();
        for entry in &self.entries {
            builder
                .insert(entry)
                .map_err(|e| GeodexError::Internal(format!("dictionary build failed: {}", e)))?;
        }
        let bytes = builder
            .into_inner()
            .map_err(|e| GeodexError::Internal(format!("dictionary build failed: {}", e)))?;
        Dictionary::from_bytes(bytes)
    }
}

/// Tracks one side of the merge walk and rejects non-increasing input.
struct SortedSide<I: Iterator<Item = Vec<u8>>> {
    iter: Peekable<I>,
    last: Option<Vec<u8>>,
    position: u64,
}

impl<I: Iterator<Item = Vec<u8>>> SortedSide<I> {
    fn new(iter: I) -> Self {
        Self {
            iter: iter.peekable(),
            last: None,
            position: 0,
        }
    }

    fn peek(&mut self) -> Result<Option<&Vec<u8>>> {
        let position = self.position;
        let last = &self.last;
        match self.iter.peek() {
            Some(next) if last.as_ref().map(|l| next <= l).unwrap_or(false) => {
                Err(GeodexError::MisorderedShardStream {
                    data_type: DataType::Stat,
                    previous: position.saturating_sub(1),
                    current: position,
                })
            }
            other => Ok(other),
        }
    }

    fn advance(&mut self) -> Option<Vec<u8>> {
        let next = self.iter.next()?;
        self.position += 1;
        self.last = Some(next.clone());
        Some(next)
    }
}

/// Merge two strictly sorted entry streams into one dictionary.
///
/// Entries present on both sides at the same step are written once. A side
/// that repeats or goes backwards fails with `MisorderedShardStream` for
/// `stat`, carrying the ordinal positions of the offending entries.
pub fn merge_sorted<L, R>(left: L, right: R) -> Result<Dictionary>
where
    L: IntoIterator<Item = Vec<u8>>,
    R: IntoIterator<Item = Vec<u8>>,
{
    let mut left = SortedSide::new(left.into_iter());
    let mut right = SortedSide::new(right.into_iter());
    let mut builder = SetBuilder::memory();

    loop {
        let take = match (left.peek()?, right.peek()?) {
            (None, None) => break,
            (Some(_), None) => Take::Left,
            (None, Some(_)) => Take::Right,
            (Some(a), Some(b)) => match a.cmp(b) {
                std::cmp::Ordering::Less => Take::Left,
                std::cmp::Ordering::Greater => Take::Right,
                std::cmp::Ordering::Equal => Take::Both,
            },
        };
        let entry = match take {
            Take::Left => left.advance(),
            Take::Right => right.advance(),
            Take::Both => {
                right.advance();
                left.advance()
            }
        };
        if let Some(entry) = entry {
            builder
                .insert(&entry)
                .map_err(|e| GeodexError::Internal(format!("dictionary merge failed: {}", e)))?;
        }
    }

    let bytes = builder
        .into_inner()
        .map_err(|e| GeodexError::Internal(format!("dictionary merge failed: {}", e)))?;
    Dictionary::from_bytes(bytes)
}

enum Take {
    Left,
    Right,
    Both,
}
