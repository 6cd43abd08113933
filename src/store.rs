//! The `Store` context object — spec §9 "Globals": "Represent them as
//! an explicit Store context passed to every operation rather than
//! module-level singletons." Every query/ingest operation takes a
//! `&Store` rather than reaching for process-wide state.

use std::path::Path;
use std::sync::Arc;

use crate::artifact::Registry;
use crate::blob::BlobStore;
use crate::chunk_index::ChunkIndex;
use crate::codec::{self, ChunkHash};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::kv::KvStore;
use crate::relation::RelationGraph;

pub struct Store {
    pub config: StoreConfig,
    pub kv: Arc<KvStore>,
    pub blobs: Arc<BlobStore>,
    pub chunks: Arc<ChunkIndex>,
    pub relations: Arc<RelationGraph>,
    pub registry: Arc<Registry>,
}

impl Store {
    pub fn open(config: StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dbpath)?;
        let blobs_root = config.dbpath.join("BLOBS");
        let kv = Arc::new(KvStore::open(&kv_path(&config.dbpath), config.quick)?);
        let blobs = Arc::new(BlobStore::open(&blobs_root, config.container_mode)?);
        let chunks = Arc::new(ChunkIndex::new(
            kv.clone(),
            &blobs_root,
            config.hierarchical,
            config.block_prefix_len,
        )?);
        let relations = Arc::new(RelationGraph::new(kv.clone()));
        let registry = Arc::new(Registry::new(kv.clone()));
        Ok(Self {
            config,
            kv,
            blobs,
            chunks,
            relations,
            registry,
        })
    }

    /// Read a chunk's plaintext bytes back, reversing whatever
    /// compression/encryption `process` applied at ingest time.
    /// Shared by restore, NeAR, and search so the unseal/decompress
    /// path has exactly one implementation.
    pub fn read_chunk_plaintext(&self, hash: &ChunkHash) -> Result<Vec<u8>> {
        let locator = self.chunks.get(hash)?.ok_or_else(|| StoreError::Corrupt {
            hash: hex::encode(hash),
            reason: "no locator for chunk hash".into(),
        })?;
        let sealed = self.blobs.get(&locator)?;
        codec::unprocess(&sealed, self.config.key.as_ref(), self.config.quick)
    }
}

fn kv_path(dbpath: &Path) -> std::path::PathBuf {
    dbpath.join("index.redb")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_expected_layout() {
        let dir = tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.dbpath = dir.path().to_path_buf();
        let _store = Store::open(config).unwrap();
        assert!(dir.path().join("index.redb").exists());
        assert!(dir.path().join("BLOBS").exists());
    }
}
