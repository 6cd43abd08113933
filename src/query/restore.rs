//! Restore: byte-exact reconstruction of any logical or physical
//! artifact (spec §4.8).

use std::io::Write;

use crate::error::{Result, StoreError};
use crate::store::Store;

use super::{assert_complete, resolve};

pub fn restore<W: Write>(store: &Store, artifact_hash: &[u8], writer: &mut W) -> Result<()> {
    let resolved = resolve(store, artifact_hash)?;
    assert_complete(store, &resolved.evi_hash)?;

    let chonk_size = store.config.chonk_size as u64;
    let dbstart = (resolved.start / chonk_size) * chonk_size;
    let end = resolved.start + resolved.size;

    let mut off = dbstart;
    while off < end {
        let chunk_hash = store
            .relations
            .get_forward(&resolved.evi_hash, off)?
            .ok_or_else(|| StoreError::HashNotFound(hex::encode(&resolved.evi_hash)))?;
        let plaintext = store.read_chunk_plaintext(&chunk_hash)?;

        let chunk_end = off + chonk_size;
        let lead_trim = if off == dbstart { resolved.start - dbstart } else { 0 };
        let tail_trim = if chunk_end > end { chunk_end - end } else { 0 };
        let lo = lead_trim as usize;
        let hi = plaintext.len().saturating_sub(tail_trim as usize);
        writer.write_all(&plaintext[lo..hi])?;

        off = chunk_end;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::fs_index::NullIndexer;
    use crate::ingest::ingest_evidence;
    use crate::partition::WholeFileReader;
    use std::fs::File;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn open_store(chonk_size: usize) -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.dbpath = dir.path().join("db");
        config.chonk_size = chonk_size;
        config.key = Some([11u8; 32]);
        (dir, Store::open(config).unwrap())
    }

    #[test]
    fn restore_reproduces_original_bytes_exactly() {
        let (dir, store) = open_store(4096);
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let path = dir.path().join("input.bin");
        File::create(&path).unwrap().write_all(&data).unwrap();

        let outcome = ingest_evidence(&store, &path, "input.bin", &WholeFileReader, &NullIndexer, true).unwrap();

        let mut out = Vec::new();
        restore(&store, &outcome.evi_hash, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn restore_rejects_incomplete_evidence() {
        let (dir, store) = open_store(4096);
        let path = dir.path().join("x.bin");
        File::create(&path).unwrap().write_all(b"partial").unwrap();
        let outcome = ingest_evidence(&store, &path, "x.bin", &WholeFileReader, &NullIndexer, true).unwrap();

        let mut record = store.registry.get_evi(&outcome.evi_hash).unwrap().unwrap();
        record.completed = false;
        store.registry.set_evi(&outcome.evi_hash, &record).unwrap();

        let mut out = Vec::new();
        let err = restore(&store, &outcome.evi_hash, &mut out).unwrap_err();
        assert!(matches!(err, StoreError::IncompleteFile(_)));
    }
}
