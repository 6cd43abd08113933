//! C8 — Query Engine: restore, NeAR, and search, all built on C3-C6
//! (spec §4.8-§4.11).

pub mod near;
pub mod restore;
pub mod search;

use crate::artifact::ArtifactKind;
use crate::error::{Result, StoreError};
use crate::store::Store;

/// Resolved `{evi_hash, start, size}` for any tier. Evidence records
/// resolve to themselves; Partition/Indexed records recover their
/// owning evidence hash via [`find_owning_evidence`]'s internals-tree
/// walk rather than by parsing their own ancestry-encoded aliases
/// (spec §4.8 step 2) — the alias string stays the human-facing record
/// of ancestry, the walk is what resolution actually uses. Shared by
/// restore, NeAR, and search.
pub struct ResolvedArtifact {
    pub hash: Vec<u8>,
    pub evi_hash: Vec<u8>,
    pub start: u64,
    pub size: u64,
    pub kind: ArtifactKind,
}

pub fn resolve(store: &Store, hash: &[u8]) -> Result<ResolvedArtifact> {
    let kind = store.registry.guess_type(hash)?;
    match kind {
        ArtifactKind::Evidence => {
            let record = store
                .registry
                .get_evi(hash)?
                .ok_or_else(|| StoreError::HashNotFound(hex::encode(hash)))?;
            Ok(ResolvedArtifact {
                hash: hash.to_vec(),
                evi_hash: hash.to_vec(),
                start: record.start,
                size: record.size,
                kind,
            })
        }
        ArtifactKind::Partition => {
            let record = store
                .registry
                .get_partition(hash)?
                .ok_or_else(|| StoreError::HashNotFound(hex::encode(hash)))?;
            let evi_hash = find_owning_evidence(store, hash)?;
            Ok(ResolvedArtifact {
                hash: hash.to_vec(),
                evi_hash,
                start: record.start,
                size: record.size,
                kind,
            })
        }
        ArtifactKind::Indexed => {
            let record = store
                .registry
                .get_indexed(hash)?
                .ok_or_else(|| StoreError::HashNotFound(hex::encode(hash)))?;
            let evi_hash = find_owning_evidence(store, hash)?;
            Ok(ResolvedArtifact {
                hash: hash.to_vec(),
                evi_hash,
                start: record.start,
                size: record.size,
                kind,
            })
        }
    }
}

/// Walk the Evidence -> Partition -> Indexed internals maps to find
/// which evidence file ultimately owns `hash`. Logical artifacts don't
/// store their ancestor hash directly; it's recovered from whichever
/// evidence record lists `hash` (possibly via an intermediate
/// partition) in its `internals` tree (spec §3 "internals").
fn find_owning_evidence(store: &Store, hash: &[u8]) -> Result<Vec<u8>> {
    for (evi_hash, record) in store.registry.list_evidence()? {
        if record.internals.contains_key(hash) {
            return Ok(evi_hash);
        }
        for (child_hash, _) in &record.internals {
            if let Some(partition) = store.registry.get_partition(child_hash)? {
                if partition.internals.contains_key(hash) {
                    return Ok(evi_hash.clone());
                }
            }
        }
    }
    Err(StoreError::HashNotFound(hex::encode(hash)))
}

pub fn assert_complete(store: &Store, evi_hash: &[u8]) -> Result<()> {
    let record = store
        .registry
        .get_evi(evi_hash)?
        .ok_or_else(|| StoreError::HashNotFound(hex::encode(evi_hash)))?;
    if !record.completed {
        return Err(StoreError::IncompleteFile(hex::encode(evi_hash)));
    }
    Ok(())
}
