//! C6 — Artifact Registry: Evidence / Partition / Indexed records
//! (spec §3 "Artifacts", §4.6).
//!
//! Records are msgpack-encoded via `rmp-serde` with additive-only field
//! evolution, matching spec §4.6's forward-compatibility requirement.
//! Aliases are ancestry-encoded strings (`parent|||grandparent|||leaf`)
//! stored as sets so the same content under many filesystem names
//! collapses to one record.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::kv::KvStore;

const EVIDENCE_PREFIX: &[u8] = b"E|||:";
const PARTITION_PREFIX: &[u8] = b"P|||:";
const INDEXED_PREFIX: &[u8] = b"I|||:";

/// `{start, end}` span of a child artifact inside its parent's byte
/// range (spec §3 invariant 4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

pub type Internals = BTreeMap<Vec<u8>, Span>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Evidence {
    pub names: BTreeSet<String>,
    pub size: u64,
    pub start: u64,
    pub completed: bool,
    pub kind: String,
    pub internals: Internals,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Partition {
    pub names: BTreeSet<String>,
    pub size: u64,
    pub start: u64,
    pub internals: Internals,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Indexed {
    pub names: BTreeSet<String>,
    pub size: u64,
    pub start: u64,
}

/// Which tier a hash resolved to, returned by [`Registry::guess_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Evidence,
    Partition,
    Indexed,
}

/// Build an ancestry-encoded alias: `<parent-hash>|||<grandparent-hash>|||<leaf-name>`
/// (spec §3 "Aliases are sets"). `grandparent` is empty for top-level evidence.
pub fn make_alias(parent_hash_hex: &str, grandparent_hash_hex: &str, leaf_name: &str) -> String {
    format!("{parent_hash_hex}|||{grandparent_hash_hex}|||{leaf_name}")
}

pub struct Registry {
    kv: Arc<KvStore>,
}

impl Registry {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    fn key(prefix: &[u8], hash: &[u8]) -> Vec<u8> {
        let mut k = prefix.to_vec();
        k.extend_from_slice(hash);
        k
    }

    pub fn get_evi(&self, hash: &[u8]) -> Result<Option<Evidence>> {
        self.get(EVIDENCE_PREFIX, hash)
    }

    pub fn set_evi(&self, hash: &[u8], record: &Evidence) -> Result<()> {
        self.set(EVIDENCE_PREFIX, hash, record)
    }

    pub fn get_partition(&self, hash: &[u8]) -> Result<Option<Partition>> {
        self.get(PARTITION_PREFIX, hash)
    }

    pub fn set_partition(&self, hash: &[u8], record: &Partition) -> Result<()> {
        self.set(PARTITION_PREFIX, hash, record)
    }

    pub fn get_indexed(&self, hash: &[u8]) -> Result<Option<Indexed>> {
        self.get(INDEXED_PREFIX, hash)
    }

    pub fn set_indexed(&self, hash: &[u8], record: &Indexed) -> Result<()> {
        self.set(INDEXED_PREFIX, hash, record)
    }

    fn get<T: for<'de> Deserialize<'de>>(&self, prefix: &[u8], hash: &[u8]) -> Result<Option<T>> {
        match self.kv.get(&Self::key(prefix, hash))? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set<T: Serialize>(&self, prefix: &[u8], hash: &[u8], record: &T) -> Result<()> {
        let encoded = rmp_serde::to_vec(record)?;
        self.kv.set(&Self::key(prefix, hash), &encoded)
    }

    /// Probe `I, P, E` in order and return the first tier that has a
    /// record for `hash` (spec §4.6). Used to resolve a user-supplied
    /// hash to its tier without out-of-band type information.
    pub fn guess_type(&self, hash: &[u8]) -> Result<ArtifactKind> {
        if self.kv.contains(&Self::key(INDEXED_PREFIX, hash))? {
            return Ok(ArtifactKind::Indexed);
        }
        if self.kv.contains(&Self::key(PARTITION_PREFIX, hash))? {
            return Ok(ArtifactKind::Partition);
        }
        if self.kv.contains(&Self::key(EVIDENCE_PREFIX, hash))? {
            return Ok(ArtifactKind::Evidence);
        }
        Err(StoreError::HashNotFound(hex::encode(hash)))
    }

    /// All evidence records, for the `list` CLI command (spec §C "list
    /// subcommand semantics", grounded on `lib/store/list.go`).
    pub fn list_evidence(&self) -> Result<Vec<(Vec<u8>, Evidence)>> {
        let mut out = Vec::new();
        for (key, value) in self.kv.scan_prefix(EVIDENCE_PREFIX)? {
            let hash = key[EVIDENCE_PREFIX.len()..].to_vec();
            let record: Evidence = rmp_serde::from_slice(&value)?;
            out.push((hash, record));
        }
        Ok(out)
    }

    pub fn list_partitions(&self) -> Result<Vec<(Vec<u8>, Partition)>> {
        let mut out = Vec::new();
        for (key, value) in self.kv.scan_prefix(PARTITION_PREFIX)? {
            let hash = key[PARTITION_PREFIX.len()..].to_vec();
            let record: Partition = rmp_serde::from_slice(&value)?;
            out.push((hash, record));
        }
        Ok(out)
    }

    pub fn list_indexed(&self) -> Result<Vec<(Vec<u8>, Indexed)>> {
        let mut out = Vec::new();
        for (key, value) in self.kv.scan_prefix(INDEXED_PREFIX)? {
            let hash = key[INDEXED_PREFIX.len()..].to_vec();
            let record: Indexed = rmp_serde::from_slice(&value)?;
            out.push((hash, record));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_registry() -> (tempfile::TempDir, Registry) {
        let dir = tempdir().unwrap();
        let kv = Arc::new(KvStore::open(&dir.path().join("kv.redb"), false).unwrap());
        (dir, Registry::new(kv))
    }

    fn sample_evidence() -> Evidence {
        let mut names = BTreeSet::new();
        names.insert("disk.img".to_string());
        Evidence {
            names,
            size: 1024,
            start: 0,
            completed: false,
            kind: "raw".to_string(),
            internals: Internals::new(),
        }
    }

    #[test]
    fn evidence_roundtrip() {
        let (_d, reg) = new_registry();
        let hash = b"evidence-hash";
        reg.set_evi(hash, &sample_evidence()).unwrap();
        let back = reg.get_evi(hash).unwrap().unwrap();
        assert_eq!(back, sample_evidence());
    }

    #[test]
    fn guess_type_prefers_indexed_over_partition_over_evidence() {
        let (_d, reg) = new_registry();
        let hash = b"shared-probe-hash";
        reg.set_evi(hash, &sample_evidence()).unwrap();
        assert_eq!(reg.guess_type(hash).unwrap(), ArtifactKind::Evidence);

        reg.set_partition(
            hash,
            &Partition {
                names: BTreeSet::new(),
                size: 10,
                start: 0,
                internals: Internals::new(),
            },
        )
        .unwrap();
        assert_eq!(reg.guess_type(hash).unwrap(), ArtifactKind::Partition);

        reg.set_indexed(
            hash,
            &Indexed {
                names: BTreeSet::new(),
                size: 10,
                start: 0,
            },
        )
        .unwrap();
        assert_eq!(reg.guess_type(hash).unwrap(), ArtifactKind::Indexed);
    }

    #[test]
    fn guess_type_missing_is_not_found() {
        let (_d, reg) = new_registry();
        assert!(reg.guess_type(b"nothing-here").is_err());
    }

    #[test]
    fn alias_encodes_ancestry() {
        let alias = make_alias("parenthash", "grandparenthash", "leaf.txt");
        assert_eq!(alias, "parenthash|||grandparenthash|||leaf.txt");
    }

    #[test]
    fn list_evidence_returns_all_records() {
        let (_d, reg) = new_registry();
        reg.set_evi(b"hash-a", &sample_evidence()).unwrap();
        reg.set_evi(b"hash-b", &sample_evidence()).unwrap();
        let listed = reg.list_evidence().unwrap();
        assert_eq!(listed.len(), 2);
    }
}
