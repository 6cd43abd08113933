//! C4 — KV Store: the single ordered key-value space everything except
//! chunk bytes lives in (spec §4.4).
//!
//! Keys are raw bytes (namespace prefix ‖ hash ‖ optional offset suffix,
//! per spec §4.4's key layout table); values are msgpack or raw bytes,
//! optionally Zstd-framed. `redb` backs this — an embedded, ordered,
//! transactional KV engine, the same role `tvix-castore`/`tvix-store`
//! use it for in the retrieval pack (see `pathinfoservice/redb.rs`
//! there). Unlike that crate this store has no async runtime, so every
//! call here is synchronous.

use redb::{ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

use crate::codec::{zstd_decode, zstd_encode, DEFAULT_ZSTD_LEVEL};
use crate::error::Result;

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

/// A single batched write: either an upsert or a delete.
pub enum WriteOp {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

fn frame(value: &[u8], quick: bool) -> Result<Vec<u8>> {
    if quick {
        Ok(value.to_vec())
    } else {
        zstd_encode(value, DEFAULT_ZSTD_LEVEL)
    }
}

fn unframe(value: Vec<u8>, quick: bool) -> Result<Vec<u8>> {
    if quick {
        Ok(value)
    } else {
        zstd_decode(&value)
    }
}

/// Thin wrapper around a `redb::Database` exposing the get/set/batch/scan
/// contract spec.md §4.4 names, independent of redb's own transaction API
/// so callers never see a `redb::*` type. Values are Zstd-framed on the
/// way in and out (spec §4.4: "all values are stored zstd-framed"), except
/// when `quick` bypasses it, mirroring `codec::process`/`unprocess`.
pub struct KvStore {
    db: Arc<redb::Database>,
    quick: bool,
}

impl KvStore {
    pub fn open(path: &Path, quick: bool) -> Result<Self> {
        let db = redb::Database::create(path)?;
        // Ensure the table exists even on a brand new file.
        let txn = db.begin_write()?;
        {
            txn.open_table(TABLE)?;
        }
        txn.commit()?;
        Ok(Self { db: Arc::new(db), quick })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TABLE)?;
        match table.get(key)? {
            Some(v) => Ok(Some(unframe(v.value().to_vec(), self.quick)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let framed = frame(value, self.quick)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TABLE)?;
            table.insert(key, framed.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TABLE)?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Apply a batch of writes atomically — used by ingest's two-phase
    /// commit so a crash mid-batch never leaves chunks without relations
    /// or vice versa (spec §5 "Data then commit").
    pub fn batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TABLE)?;
            for op in ops {
                match op {
                    WriteOp::Set(k, v) => {
                        let framed = frame(&v, self.quick)?;
                        table.insert(k.as_slice(), framed.as_slice())?;
                    }
                    WriteOp::Delete(k) => {
                        table.remove(k.as_slice())?;
                    }
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Iterate every key whose bytes start with `prefix`, in ascending
    /// key order, returning `(key, value)` pairs. Backed by a single
    /// read-transaction snapshot so concurrent writers can't skew the
    /// scan mid-flight (spec §9 snapshot requirement for NeAR).
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TABLE)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let k = k.value();
            if k.starts_with(prefix) {
                out.push((k.to_vec(), unframe(v.value().to_vec(), self.quick)?));
            } else if !out.is_empty() {
                // keys are in ascending order; once we've passed the
                // matching range we can stop early.
                break;
            }
        }
        Ok(out)
    }

    /// Snapshot handle for callers (NeAR, search) that need several
    /// reads to observe the same point-in-time view of the store.
    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            txn: self.db.begin_read()?,
            quick: self.quick,
        })
    }
}

/// A read-only, point-in-time view of the KV store.
pub struct Snapshot {
    txn: redb::ReadTransaction,
    quick: bool,
}

impl Snapshot {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let table = self.txn.open_table(TABLE)?;
        match table.get(key)? {
            Some(v) => Ok(Some(unframe(v.value().to_vec(), self.quick)?)),
            None => Ok(None),
        }
    }

    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let table = self.txn.open_table(TABLE)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let k = k.value();
            if k.starts_with(prefix) {
                out.push((k.to_vec(), unframe(v.value().to_vec(), self.quick)?));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_tmp() -> (tempfile::TempDir, KvStore) {
        let dir = tempdir().unwrap();
        let store = KvStore::open(&dir.path().join("kv.redb"), false).unwrap();
        (dir, store)
    }

    #[test]
    fn set_then_get_roundtrips() {
        let (_dir, kv) = open_tmp();
        kv.set(b"k1", b"v1").unwrap();
        assert_eq!(kv.get(b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(kv.get(b"missing").unwrap(), None);
    }

    #[test]
    fn delete_removes_key() {
        let (_dir, kv) = open_tmp();
        kv.set(b"k1", b"v1").unwrap();
        kv.delete(b"k1").unwrap();
        assert_eq!(kv.get(b"k1").unwrap(), None);
    }

    #[test]
    fn scan_prefix_finds_only_matching_keys() {
        let (_dir, kv) = open_tmp();
        kv.set(b"E|||:aaa", b"1").unwrap();
        kv.set(b"E|||:bbb", b"2").unwrap();
        kv.set(b"P|||:ccc", b"3").unwrap();
        let mut found = kv.scan_prefix(b"E|||:").unwrap();
        found.sort();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|(k, _)| k.starts_with(b"E|||:")));
    }

    #[test]
    fn batch_is_atomic_in_effect() {
        let (_dir, kv) = open_tmp();
        kv.batch(vec![
            WriteOp::Set(b"a".to_vec(), b"1".to_vec()),
            WriteOp::Set(b"b".to_vec(), b"2".to_vec()),
        ])
        .unwrap();
        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(kv.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn snapshot_reflects_state_at_creation() {
        let (_dir, kv) = open_tmp();
        kv.set(b"a", b"1").unwrap();
        let snap = kv.snapshot().unwrap();
        kv.set(b"a", b"2").unwrap();
        assert_eq!(snap.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(kv.get(b"a").unwrap(), Some(b"2".to_vec()));
    }
}
