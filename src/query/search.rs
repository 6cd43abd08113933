//! Search: find a byte pattern across every stored artifact with
//! exactly-once accounting across chunk boundaries (spec §4.11).

use std::collections::{BTreeMap, HashMap};

use regex::bytes::Regex;

use crate::codec::ChunkHash;
use crate::error::{Result, StoreError};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct SearchMatch {
    pub offset: u64,
    pub text: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SearchReport {
    pub artifact_hash: Vec<u8>,
    pub aliases: Vec<String>,
    pub matches: Vec<SearchMatch>,
}

type WindowKey = (ChunkHash, Option<ChunkHash>);

pub fn search(store: &Store, pattern: &str) -> Result<Vec<SearchReport>> {
    if pattern.len() < 2 {
        return Err(StoreError::SmallQuery);
    }
    let re = Regex::new(pattern)?;
    let chonk_size = store.config.chonk_size as u64;

    let mut cache: HashMap<WindowKey, Vec<(usize, Vec<u8>)>> = HashMap::new();
    let mut by_artifact: BTreeMap<Vec<u8>, Vec<SearchMatch>> = BTreeMap::new();

    for (artifact_hash, evi_hash, start, size) in all_artifacts(store)? {
        let dbstart = (start / chonk_size) * chonk_size;
        let end = start + size;
        let mut off = dbstart;
        while off < end {
            let Some(chunk_hash) = store.relations.get_forward(&evi_hash, off)? else {
                off += chonk_size;
                continue;
            };
            let next_off = off + chonk_size;
            let next_hash = if next_off < end {
                store.relations.get_forward(&evi_hash, next_off)?
            } else {
                None
            };

            let window_matches = match cache.get(&(chunk_hash, next_hash)) {
                Some(cached) => cached.clone(),
                None => {
                    let found = scan_window(store, &re, &chunk_hash, next_hash)?;
                    cache.insert((chunk_hash, next_hash), found.clone());
                    found
                }
            };

            for (rel_off, text) in window_matches {
                let abs_off = off + rel_off as u64;
                if abs_off >= start && abs_off < end {
                    by_artifact
                        .entry(artifact_hash.clone())
                        .or_default()
                        .push(SearchMatch { offset: abs_off, text });
                }
            }

            off += chonk_size;
        }
    }

    build_reports(store, by_artifact)
}

/// Scan one boundary window exactly once: the concatenation of the
/// current chunk and (if present) its neighbor. Only matches starting
/// strictly inside the current chunk are kept — matches wholly inside
/// the neighbor are left for when the neighbor becomes the "current"
/// chunk on the next iteration, giving exactly-once accounting
/// (spec §4.11 step 3).
fn scan_window(
    store: &Store,
    re: &Regex,
    chunk_hash: &ChunkHash,
    next_hash: Option<ChunkHash>,
) -> Result<Vec<(usize, Vec<u8>)>> {
    let state1 = store.read_chunk_plaintext(chunk_hash)?;
    let boundary = state1.len();
    let mut window = state1;
    if let Some(next) = next_hash {
        let state2 = store.read_chunk_plaintext(&next)?;
        window.extend_from_slice(&state2);
    }

    let mut found = Vec::new();
    for m in re.find_iter(&window) {
        if m.start() < boundary {
            found.push((m.start(), m.as_bytes().to_vec()));
        }
    }
    Ok(found)
}

/// Every artifact in the store as `(hash, evi_hash, start, size)`,
/// spanning all three tiers (spec §4.11 "Scope").
fn all_artifacts(store: &Store) -> Result<Vec<(Vec<u8>, Vec<u8>, u64, u64)>> {
    let mut out = Vec::new();
    for (hash, record) in store.registry.list_evidence()? {
        out.push((hash.clone(), hash, record.start, record.size));
    }
    for (hash, record) in store.registry.list_partitions()? {
        let resolved = super::resolve(store, &hash)?;
        out.push((hash, resolved.evi_hash, record.start, record.size));
    }
    for (hash, record) in store.registry.list_indexed()? {
        let resolved = super::resolve(store, &hash)?;
        out.push((hash, resolved.evi_hash, record.start, record.size));
    }
    Ok(out)
}

fn build_reports(store: &Store, by_artifact: BTreeMap<Vec<u8>, Vec<SearchMatch>>) -> Result<Vec<SearchReport>> {
    let mut reports = Vec::new();
    for (artifact_hash, matches) in by_artifact {
        let aliases = aliases_for(store, &artifact_hash)?;
        reports.push(SearchReport {
            artifact_hash,
            aliases,
            matches,
        });
    }
    Ok(reports)
}

fn aliases_for(store: &Store, hash: &[u8]) -> Result<Vec<String>> {
    if let Some(evi) = store.registry.get_evi(hash)? {
        return Ok(evi.names.into_iter().collect());
    }
    if let Some(p) = store.registry.get_partition(hash)? {
        return Ok(p.names.into_iter().collect());
    }
    if let Some(i) = store.registry.get_indexed(hash)? {
        return Ok(i.names.into_iter().collect());
    }
    Ok(Vec::new())
}
