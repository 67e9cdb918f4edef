use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use fjall::{Database, Keyspace, KeyspaceCreateOptions, PersistMode};
use tracing::debug;

use super::{decode_shard_key, ListedShardIterator, ShardIterator, ShardStore};
use crate::error::{GeodexError, Result};
use crate::models::{DataType, ShardNo};

/// Fjall-backed shard store: one keyspace per data type, shard numbers as
/// big-endian keys so key order is shard order.
pub struct FjallShardStore {
    path: PathBuf,
    db: Database,
    keyspaces: HashMap<DataType, Keyspace>,
}

impl FjallShardStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        let db = Database::builder(&path).open().map_err(|e| {
            GeodexError::Internal(format!(
                "failed to open fjall store at {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut keyspaces = HashMap::new();
        for ty in DataType::ALL {
            let keyspace = db
                .keyspace(ty.as_str(), || KeyspaceCreateOptions::default())
                .map_err(|e| GeodexError::persistence(ty, None, e))?;
            keyspaces.insert(ty, keyspace);
        }
        debug!(path = %path.display(), "opened fjall shard store");

        Ok(Self {
            path,
            db,
            keyspaces,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn keyspace(&self, ty: DataType) -> Result<&Keyspace> {
        self.keyspaces
            .get(&ty)
            .ok_or_else(|| GeodexError::persistence(ty, None, "keyspace not open"))
    }
}

#[async_trait]
impl ShardStore for FjallShardStore {
    async fn get_shard(&self, ty: DataType, shard: ShardNo) -> Result<Option<Bytes>> {
        let value = self
            .keyspace(ty)?
            .get(shard.to_be_bytes())
            .map_err(|e| GeodexError::persistence(ty, Some(shard), e))?;
        Ok(value.map(|v| Bytes::copy_from_slice(v.as_ref())))
    }

    async fn put_shard(&self, ty: DataType, shard: ShardNo, data: Bytes) -> Result<()> {
        self.keyspace(ty)?
            .insert(shard.to_be_bytes(), data.to_vec())
            .map_err(|e| GeodexError::persistence(ty, Some(shard), e))?;
        Ok(())
    }

    async fn list_shards(&self, ty: DataType) -> Result<Vec<ShardNo>> {
        let mut out = Vec::new();
        for kv in self.keyspace(ty)?.iter() {
            let key = kv.key().map_err(|e| GeodexError::persistence(ty, None, e))?;
            out.push(decode_shard_key(ty, key.as_ref())?);
        }
        Ok(out)
    }

    fn shard_iter<'a>(&'a self, ty: DataType) -> Box<dyn ShardIterator + 'a> {
        Box::new(ListedShardIterator::new(self, ty))
    }

    async fn close(&self) -> Result<()> {
        self.db
            .persist(PersistMode::SyncAll)
            .map_err(|e| GeodexError::Internal(format!("failed to persist fjall store: {}", e)))?;
        debug!(path = %self.path.display(), "persisted fjall shard store");
        Ok(())
    }
}
