//! C5 — Relation Graph: forward `(artifact, offset) -> chunk` and
//! reverse `(chunk, offset) -> set<artifact>` indices (spec §4.5).
//!
//! Both live in the KV store under `R|||:` and `Я|||:` respectively.
//! Reverse-relation updates are a get-modify-put union: concurrent
//! writers to the same `(chunk, offset)` cell are serialized by the KV
//! store's per-key write path, and the final value must be the union of
//! every contribution (spec §4.5, §5 "Ordering guarantees").

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::codec::ChunkHash;
use crate::error::Result;
use crate::kv::KvStore;

const FORWARD_PREFIX: &[u8] = b"R|||:";
const REVERSE_PREFIX: &[u8] = b"\xD0\xAF|||:"; // "Я|||:" in UTF-8

fn forward_key(artifact_hash: &[u8], offset: u64) -> Vec<u8> {
    let mut k = FORWARD_PREFIX.to_vec();
    k.extend_from_slice(artifact_hash);
    k.extend_from_slice(format!("|||{offset}").as_bytes());
    k
}

fn reverse_key(chunk_hash: &ChunkHash, offset: u64) -> Vec<u8> {
    let mut k = REVERSE_PREFIX.to_vec();
    k.extend_from_slice(chunk_hash);
    k.extend_from_slice(format!("|||{offset}").as_bytes());
    k
}

/// Reverse-relation value: the set of artifact hashes sharing a chunk
/// at a given offset, encoded as a sorted list of hex strings for
/// stable msgpack round-tripping.
pub type ArtifactSet = BTreeSet<Vec<u8>>;

pub struct RelationGraph {
    kv: Arc<KvStore>,
}

impl RelationGraph {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    pub fn put_forward(&self, artifact_hash: &[u8], offset: u64, chunk_hash: &ChunkHash) -> Result<()> {
        self.kv.set(&forward_key(artifact_hash, offset), chunk_hash)
    }

    pub fn get_forward(&self, artifact_hash: &[u8], offset: u64) -> Result<Option<ChunkHash>> {
        match self.kv.get(&forward_key(artifact_hash, offset))? {
            Some(bytes) if bytes.len() == 64 => {
                let mut h = [0u8; 64];
                h.copy_from_slice(&bytes);
                Ok(Some(h))
            }
            Some(_) => Ok(None),
            None => Ok(None),
        }
    }

    pub fn put_reverse(&self, chunk_hash: &ChunkHash, offset: u64, artifact_hash: &[u8]) -> Result<()> {
        let key = reverse_key(chunk_hash, offset);
        let mut set = self.get_reverse_raw(&key)?;
        set.insert(artifact_hash.to_vec());
        let encoded = rmp_serde::to_vec(&set)?;
        self.kv.set(&key, &encoded)
    }

    pub fn get_reverse(&self, chunk_hash: &ChunkHash, offset: u64) -> Result<ArtifactSet> {
        self.get_reverse_raw(&reverse_key(chunk_hash, offset))
    }

    fn get_reverse_raw(&self, key: &[u8]) -> Result<ArtifactSet> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(rmp_serde::from_slice(&bytes)?),
            None => Ok(ArtifactSet::new()),
        }
    }

    /// `rel_same_chunk(chunk, off)`: every `(off', set<artifact>)`
    /// sharing `chunk_hash` regardless of offset — used by NeAR to
    /// aggregate matches of the same chunk appearing at other
    /// locations in other files (spec §4.5).
    pub fn rel_same_chunk(&self, chunk_hash: &ChunkHash) -> Result<Vec<(u64, ArtifactSet)>> {
        let mut prefix = REVERSE_PREFIX.to_vec();
        prefix.extend_from_slice(chunk_hash);
        let mut out = Vec::new();
        for (key, value) in self.kv.scan_prefix(&prefix)? {
            if let Some(offset) = parse_offset_suffix(&key, prefix.len()) {
                let set: ArtifactSet = rmp_serde::from_slice(&value)?;
                out.push((offset, set));
            }
        }
        Ok(out)
    }
}

fn parse_offset_suffix(key: &[u8], prefix_len: usize) -> Option<u64> {
    let rest = &key[prefix_len..];
    let s = std::str::from_utf8(rest).ok()?;
    let s = s.strip_prefix("|||")?;
    s.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use tempfile::tempdir;

    fn new_graph() -> (tempfile::TempDir, RelationGraph) {
        let dir = tempdir().unwrap();
        let kv = Arc::new(KvStore::open(&dir.path().join("kv.redb"), false).unwrap());
        (dir, RelationGraph::new(kv))
    }

    #[test]
    fn forward_roundtrip() {
        let (_d, g) = new_graph();
        let evi = b"evidence-hash-bytes";
        let chunk = codec::hash_chunk(b"chunk bytes");
        g.put_forward(evi, 0, &chunk).unwrap();
        assert_eq!(g.get_forward(evi, 0).unwrap(), Some(chunk));
        assert_eq!(g.get_forward(evi, 4096).unwrap(), None);
    }

    #[test]
    fn reverse_union_semantics() {
        let (_d, g) = new_graph();
        let chunk = codec::hash_chunk(b"shared chunk");
        g.put_reverse(&chunk, 0, b"evidence-a").unwrap();
        g.put_reverse(&chunk, 0, b"evidence-b").unwrap();
        let set = g.get_reverse(&chunk, 0).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&b"evidence-a".to_vec()));
        assert!(set.contains(&b"evidence-b".to_vec()));
    }

    #[test]
    fn reverse_union_is_idempotent_for_duplicate_inserts() {
        let (_d, g) = new_graph();
        let chunk = codec::hash_chunk(b"x");
        g.put_reverse(&chunk, 0, b"evi").unwrap();
        g.put_reverse(&chunk, 0, b"evi").unwrap();
        assert_eq!(g.get_reverse(&chunk, 0).unwrap().len(), 1);
    }

    #[test]
    fn rel_same_chunk_aggregates_across_offsets() {
        let (_d, g) = new_graph();
        let chunk = codec::hash_chunk(b"recurring chunk");
        g.put_reverse(&chunk, 0, b"evi-a").unwrap();
        g.put_reverse(&chunk, 4096, b"evi-b").unwrap();
        let mut results = g.rel_same_chunk(&chunk).unwrap();
        results.sort_by_key(|(off, _)| *off);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 0);
        assert_eq!(results[1].0, 4096);
    }
}
