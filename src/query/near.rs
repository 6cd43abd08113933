//! NeAR — Near-Artifact Relation search (spec §4.9-§4.10): discover
//! other stored artifacts sharing chunks with a target, with optional
//! partial-match for chunks that are otherwise unique.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::codec::ChunkHash;
use crate::error::Result;
use crate::store::Store;

use super::resolve;

/// `artifact_hash -> confidence ∈ [0, 100]`.
pub type NearResult = BTreeMap<Vec<u8>, f64>;

pub fn near(store: &Store, target_hash: &[u8], deep: bool) -> Result<NearResult> {
    let span = tracing::info_span!("near", target = hex::encode(target_hash), deep);
    let _guard = span.enter();

    let target = resolve(store, target_hash)?;
    let chonk_size = store.config.chonk_size as u64;
    let dbstart = (target.start / chonk_size) * chonk_size;
    let end = target.start + target.size;

    let mut accumulated: BTreeMap<Vec<u8>, f64> = BTreeMap::new();
    let mut seen: BTreeSet<(u64, Vec<u8>)> = BTreeSet::new();
    let mut seen_offsets: HashSet<u64> = HashSet::new();

    let mut off = dbstart;
    while off < end {
        if !seen_offsets.insert(off) {
            off += chonk_size;
            continue;
        }
        let Some(chunk_hash) = store.relations.get_forward(&target.evi_hash, off)? else {
            off += chonk_size;
            continue;
        };

        let mut revset = store.relations.get_reverse(&chunk_hash, off)?;

        if revset.len() < 2 {
            if deep {
                credit_partial_match(store, &chunk_hash, off, &mut accumulated, &mut seen)?;
            }
            off += chonk_size;
            continue;
        }
        revset.remove(&target.evi_hash);

        for (other_off, other_set) in store.relations.rel_same_chunk(&chunk_hash)? {
            if other_off == off {
                continue;
            }
            for h in other_set {
                if h != target.evi_hash {
                    revset.insert(h);
                }
            }
        }

        for revhash in &revset {
            if *revhash == target.evi_hash {
                continue;
            }
            credit_tree(store, revhash, off, 1.0, &mut accumulated, &mut seen)?;
        }

        off += chonk_size;
    }

    let mut result = NearResult::new();
    for (hash, score) in accumulated {
        let artifact_size = match super::resolve(store, &hash) {
            Ok(r) => r.size,
            Err(_) => continue,
        };
        let denom = (artifact_size as f64 / chonk_size as f64).max(1.0);
        let confidence = (100.0 * score / denom).min(100.0);
        result.insert(hash, confidence);
    }
    Ok(result)
}

/// Tree-walk accounting: credit the deepest artifact whose `internals`
/// span contains `off`, falling back to the parent when no child is
/// in range (spec §4.9 step 6, confirmed against `lib/near/near.go` in
/// the retrieval pack's `original_source/`).
fn credit_tree(
    store: &Store,
    evi_hash: &[u8],
    off: u64,
    weight: f64,
    accumulated: &mut BTreeMap<Vec<u8>, f64>,
    seen: &mut BTreeSet<(u64, Vec<u8>)>,
) -> Result<()> {
    let Some(evi) = store.registry.get_evi(evi_hash)? else {
        return Ok(());
    };

    let mut partitions = Vec::new();
    for (child, span) in &evi.internals {
        if store.registry.get_partition(child)?.is_some() {
            partitions.push((child.clone(), *span));
        }
    }

    if partitions.is_empty() {
        credit(accumulated, seen, evi_hash, off, weight);
        return Ok(());
    }

    match partitions.iter().find(|(_, span)| span.start <= off && off < span.end) {
        Some((p_hash, _)) => credit_partition(store, p_hash, off, weight, accumulated, seen),
        None => {
            credit(accumulated, seen, evi_hash, off, weight);
            Ok(())
        }
    }
}

fn credit_partition(
    store: &Store,
    p_hash: &[u8],
    off: u64,
    weight: f64,
    accumulated: &mut BTreeMap<Vec<u8>, f64>,
    seen: &mut BTreeSet<(u64, Vec<u8>)>,
) -> Result<()> {
    let Some(partition) = store.registry.get_partition(p_hash)? else {
        return Ok(());
    };

    let mut indexed = Vec::new();
    for (child, span) in &partition.internals {
        if store.registry.get_indexed(child)?.is_some() {
            indexed.push((child.clone(), *span));
        }
    }

    if indexed.is_empty() {
        credit(accumulated, seen, p_hash, off, weight);
        return Ok(());
    }

    match indexed.iter().find(|(_, span)| span.start <= off && off < span.end) {
        Some((i_hash, _)) => {
            credit(accumulated, seen, i_hash, off, weight);
        }
        None => credit(accumulated, seen, p_hash, off, weight),
    }
    Ok(())
}

fn credit(
    accumulated: &mut BTreeMap<Vec<u8>, f64>,
    seen: &mut BTreeSet<(u64, Vec<u8>)>,
    hash: &[u8],
    off: u64,
    weight: f64,
) {
    if seen.insert((off, hash.to_vec())) {
        *accumulated.entry(hash.to_vec()).or_insert(0.0) += weight;
    }
}

/// `partial_match` (spec §4.10): iterate the whole chunk namespace
/// looking for the closest non-identical chunk by positional byte
/// equality, then credit whatever artifacts reference *that* chunk at
/// this offset, weighted by the match ratio.
fn credit_partial_match(
    store: &Store,
    target_chunk: &ChunkHash,
    off: u64,
    accumulated: &mut BTreeMap<Vec<u8>, f64>,
    seen: &mut BTreeSet<(u64, Vec<u8>)>,
) -> Result<()> {
    if let Some((best_chunk, ratio)) = partial_match(store, target_chunk)? {
        if ratio > 0.0 {
            let revset = store.relations.get_reverse(&best_chunk, off)?;
            for revhash in &revset {
                credit_tree(store, revhash, off, ratio, accumulated, seen)?;
            }
        }
    }
    Ok(())
}

/// Returns the best-matching candidate chunk hash and its match ratio,
/// excluding identity matches. O(#unique chunks); only invoked for
/// rare chunks (spec §4.10).
pub fn partial_match(store: &Store, target_chunk: &ChunkHash) -> Result<Option<(ChunkHash, f64)>> {
    let target_bytes = store.read_chunk_plaintext(target_chunk)?;
    let mut best: Option<(ChunkHash, f64)> = None;

    for candidate in store.chunks.iter_all_hashes()? {
        if &candidate == target_chunk {
            continue;
        }
        let candidate_bytes = store.read_chunk_plaintext(&candidate)?;
        let ratio = byte_equal_ratio(&target_bytes, &candidate_bytes);
        if ratio >= 1.0 {
            continue;
        }
        // first-max-wins: only replace on a strictly greater ratio.
        if best.as_ref().map(|(_, r)| ratio > *r).unwrap_or(true) {
            best = Some((candidate, ratio));
        }
    }
    Ok(best)
}

fn byte_equal_ratio(a: &[u8], b: &[u8]) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let equal = a.iter().zip(b.iter()).take(len).filter(|(x, y)| x == y).count();
    equal as f64 / len as f64
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
        config.key = Some([21u8; 32]);
        (dir, Store::open(config).unwrap())
    }

    #[test]
    fn near_symmetry_for_identical_files_under_different_aliases() {
        let (dir, store) = open_store(4096);
        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 191) as u8).collect();
        let path_a = dir.path().join("a.bin");
        let path_b = dir.path().join("b.bin");
        File::create(&path_a).unwrap().write_all(&data).unwrap();
        File::create(&path_b).unwrap().write_all(&data).unwrap();

        let outcome = ingest_evidence(&store, &path_a, "a.bin", &WholeFileReader, &NullIndexer, true).unwrap();
        // Second ingest of byte-identical content collapses to the
        // same evidence hash with a second alias, so there is nothing
        // distinct to find via NeAR — this exercises the self-filter.
        let second = ingest_evidence(&store, &path_b, "b.bin", &WholeFileReader, &NullIndexer, true).unwrap();
        assert_eq!(outcome.evi_hash, second.evi_hash);

        let result = near(&store, &outcome.evi_hash, false).unwrap();
        assert!(result.is_empty(), "identical content has no distinct sibling artifact to report");
    }

    #[test]
    fn near_finds_near_duplicate_with_one_differing_chunk() {
        let (dir, store) = open_store(4096);
        let base: Vec<u8> = (0..40_000u32).map(|i| (i % 191) as u8).collect();
        let mut modified = base.clone();
        for b in modified[4096..8192].iter_mut() {
            *b = b.wrapping_add(1);
        }

        let path_a = dir.path().join("a.bin");
        let path_b = dir.path().join("b.bin");
        File::create(&path_a).unwrap().write_all(&base).unwrap();
        File::create(&path_b).unwrap().write_all(&modified).unwrap();

        let a = ingest_evidence(&store, &path_a, "a.bin", &WholeFileReader, &NullIndexer, true).unwrap();
        let b = ingest_evidence(&store, &path_b, "b.bin", &WholeFileReader, &NullIndexer, true).unwrap();
        assert_ne!(a.evi_hash, b.evi_hash);

        let result = near(&store, &a.evi_hash, false).unwrap();
        assert!(result.contains_key(&b.evi_hash));
        let confidence = result[&b.evi_hash];
        assert!(confidence > 50.0 && confidence < 100.0);
    }

    #[test]
    fn deep_near_on_all_unique_chunks_returns_partial_matches() {
        let (dir, store) = open_store(4096);
        let unique_a: Vec<u8> = (0..8192u32).map(|i| (i % 7) as u8).collect();
        let unique_b: Vec<u8> = (0..8192u32).map(|i| ((i + 1) % 11) as u8).collect();

        let path_a = dir.path().join("a.bin");
        let path_b = dir.path().join("b.bin");
        File::create(&path_a).unwrap().write_all(&unique_a).unwrap();
        File::create(&path_b).unwrap().write_all(&unique_b).unwrap();

        let a = ingest_evidence(&store, &path_a, "a.bin", &WholeFileReader, &NullIndexer, true).unwrap();
        let _b = ingest_evidence(&store, &path_b, "b.bin", &WholeFileReader, &NullIndexer, true).unwrap();

        let baseline = near(&store, &a.evi_hash, false).unwrap();
        assert!(baseline.is_empty());

        let deep = near(&store, &a.evi_hash, true).unwrap();
        for confidence in deep.values() {
            assert!(*confidence < 100.0);
        }
    }
}
