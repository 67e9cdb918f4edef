//! Paginated document input.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::warn;

use crate::error::Result;
use crate::models::Document;

/// Opaque resume position of a document source
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor(u64);

/// Yields documents a page at a time.
#[async_trait]
pub trait DocumentSource: Send {
    /// Up to `limit` documents starting at `cursor` (`None` for the start),
    /// with the cursor of the next page or `None` once exhausted.
    async fn next_batch(
        &mut self,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<(Vec<Document>, Option<Cursor>)>;
}

/// In-memory source
pub struct VecSource {
    docs: Vec<Document>,
}

impl VecSource {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs }
    }
}

#[async_trait]
impl DocumentSource for VecSource {
    async fn next_batch(
        &mut self,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<(Vec<Document>, Option<Cursor>)> {
        let start = cursor.map(|c| c.0 as usize).unwrap_or(0).min(self.docs.len());
        let end = start.saturating_add(limit).min(self.docs.len());
        let next = (end < self.docs.len()).then_some(Cursor(end as u64));
        Ok((self.docs[start..end].to_vec(), next))
    }
}

/// Line-delimited JSON file; the cursor is a byte offset. Lines that do not
/// parse as a document are skipped with a warning.
pub struct JsonLinesSource {
    path: PathBuf,
}

impl JsonLinesSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl DocumentSource for JsonLinesSource {
    async fn next_batch(
        &mut self,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<(Vec<Document>, Option<Cursor>)> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let mut offset = cursor.map(|c| c.0).unwrap_or(0);
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut reader = BufReader::new(file);

        let mut docs = Vec::new();
        let mut line = String::new();
        while docs.len() < limit {
            line.clear();
            let read = reader.read_line(&mut line).await?;
            if read == 0 {
                return Ok((docs, None));
            }
            offset += read as u64;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Document>(trimmed) {
                Ok(doc) => docs.push(doc),
                Err(e) => warn!(path = %self.path.display(), offset, error = %e, "skipping malformed document"),
            }
        }

        // Peek for more input so the last page reports exhaustion.
        let more = !reader.fill_buf().await?.is_empty();
        Ok((docs, more.then_some(Cursor(offset))))
    }
}
