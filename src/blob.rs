//! C2 — Blob Store: content-addressed storage of sealed chunk bytes,
//! separate from the KV store (spec §4.2).
//!
//! Two modes, selected by `StoreConfig::container_mode`:
//!
//! - **Per-chunk** (default): one file per chunk, named from a
//!   25-character base32 prefix of the chunk hash.
//! - **Container**: chunks are appended to a rotating container file,
//!   capped at [`crate::config::MAX_CONTAINER_SIZE`]; on rotation the
//!   finished container is Zstd-compressed in place and the
//!   uncompressed original removed (grounded on `lib/fio/container.go`
//!   in the retrieval pack's `original_source/`, which uses exactly
//!   this rotate-then-recompress scheme). Container *names* are derived
//!   from `hash_chunk(format!("container_{n}"))`, not random, so a
//!   store's layout is reproducible from its rotation count alone.

use data_encoding::BASE32_NOPAD;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::codec::{self, ChunkHash};
use crate::config::MAX_CONTAINER_SIZE;
use crate::error::{Result, StoreError};

/// Where a chunk's sealed bytes live: either its own file, or an offset
/// range inside a (possibly already-rotated-and-compressed) container.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum BlobLocator {
    PerChunk { name: String },
    Container { name: String, offset: u64, size: u64 },
}

pub struct BlobStore {
    root: PathBuf,
    container_mode: bool,
    /// Active (not-yet-rotated) container state, `None` in per-chunk mode.
    active: Mutex<Option<ActiveContainer>>,
}

struct ActiveContainer {
    index: u64,
    name: String,
    file: File,
    size: u64,
}

/// 25-character base32 name derived from a chunk hash (or, for
/// containers, from `hash_chunk("container_{n}")`), matching the
/// original implementation's blob-naming scheme.
pub fn derive_name(hash: &[u8]) -> String {
    let encoded = BASE32_NOPAD.encode(hash);
    encoded.chars().take(25).collect()
}

pub fn container_name(index: u64) -> String {
    let h = codec::hash_chunk(format!("container_{index}").as_bytes());
    derive_name(&h)
}

impl BlobStore {
    pub fn open(root: &Path, container_mode: bool) -> Result<Self> {
        fs::create_dir_all(root)?;
        let store = Self {
            root: root.to_path_buf(),
            container_mode,
            active: Mutex::new(None),
        };
        if container_mode {
            store.recover_active_container()?;
        }
        Ok(store)
    }

    /// On reopen, find the highest-numbered uncompressed container
    /// (`.blob` rather than `.blob.zst`) and resume appending to it.
    fn recover_active_container(&self) -> Result<()> {
        let mut best: Option<(u64, String, u64)> = None;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let fname = entry.file_name().to_string_lossy().to_string();
            if let Some(idx_str) = fname.strip_prefix("container_").and_then(|s| s.strip_suffix(".blob")) {
                if let Ok(idx) = idx_str.parse::<u64>() {
                    let size = entry.metadata()?.len();
                    if best.as_ref().map(|(b, _, _)| idx > *b).unwrap_or(true) {
                        best = Some((idx, fname, size));
                    }
                }
            }
        }
        if let Some((idx, fname, size)) = best {
            let path = self.root.join(&fname);
            let file = OpenOptions::new().append(true).read(true).open(&path)?;
            *self.active.lock().unwrap() = Some(ActiveContainer {
                index: idx,
                name: container_name(idx),
                file,
                size,
            });
        }
        Ok(())
    }

    fn per_chunk_path(&self, hash: &ChunkHash) -> PathBuf {
        self.root.join(derive_name(hash))
    }

    /// Write sealed bytes for `hash`, returning where they landed.
    /// Idempotent in per-chunk mode (same hash always writes the same
    /// file); in container mode the same content is always re-appended
    /// since containers don't dedup internally — dedup happens one
    /// level up, in `chunk_index`, before this is ever called.
    pub fn put(&self, hash: &ChunkHash, sealed: &[u8]) -> Result<BlobLocator> {
        if !self.container_mode {
            let path = self.per_chunk_path(hash);
            if !path.exists() {
                let mut f = File::create(&path)?;
                f.write_all(sealed)?;
            }
            return Ok(BlobLocator::PerChunk {
                name: derive_name(hash),
            });
        }

        let mut guard = self.active.lock().unwrap();
        if guard.is_none() {
            *guard = Some(self.create_container(0)?);
        }
        if guard.as_ref().unwrap().size + sealed.len() as u64 > MAX_CONTAINER_SIZE {
            let finished = guard.take().unwrap();
            self.rotate(finished)?;
            let next_index = self.next_container_index()?;
            *guard = Some(self.create_container(next_index)?);
        }
        let active = guard.as_mut().unwrap();
        let offset = active.size;
        active.file.write_all(sealed)?;
        active.file.flush()?;
        active.size += sealed.len() as u64;
        Ok(BlobLocator::Container {
            name: active.name.clone(),
            offset,
            size: sealed.len() as u64,
        })
    }

    fn next_container_index(&self) -> Result<u64> {
        let mut max = 0u64;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let fname = entry.file_name().to_string_lossy().to_string();
            if let Some(rest) = fname.strip_prefix("container_") {
                let idx_str = rest.trim_end_matches(".zst").trim_end_matches(".blob");
                if let Ok(idx) = idx_str.parse::<u64>() {
                    max = max.max(idx + 1);
                }
            }
        }
        Ok(max)
    }

    fn create_container(&self, index: u64) -> Result<ActiveContainer> {
        let path = self.root.join(format!("container_{index}.blob"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        Ok(ActiveContainer {
            index,
            name: container_name(index),
            file,
            size: 0,
        })
    }

    /// Zstd-compress a finished container and drop the uncompressed
    /// original, per `lib/fio/container.go`'s rotate-on-full scheme.
    fn rotate(&self, mut finished: ActiveContainer) -> Result<()> {
        finished.file.seek(SeekFrom::Start(0))?;
        let mut raw = Vec::with_capacity(finished.size as usize);
        finished.file.read_to_end(&mut raw)?;
        let compressed = codec::zstd_encode(&raw, codec::DEFAULT_ZSTD_LEVEL)?;
        let src = self.root.join(format!("container_{}.blob", finished.index));
        let dst = self.root.join(format!("container_{}.blob.zst", finished.index));
        fs::write(&dst, compressed)?;
        fs::remove_file(&src)?;
        Ok(())
    }

    /// Read sealed bytes back for a given locator. Container reads try
    /// the live `.blob` file first, then fall back to the compressed
    /// `.blob.zst` sibling and locate the range inside the decompressed
    /// stream (the original implementation's read-side fallback).
    pub fn get(&self, locator: &BlobLocator) -> Result<Vec<u8>> {
        match locator {
            BlobLocator::PerChunk { name } => {
                let path = self.root.join(name);
                let mut buf = Vec::new();
                File::open(&path)
                    .map_err(|_| StoreError::Corrupt {
                        hash: name.clone(),
                        reason: "blob file missing".into(),
                    })?
                    .read_to_end(&mut buf)?;
                Ok(buf)
            }
            BlobLocator::Container { name, offset, size } => {
                self.read_container_range(name, *offset, *size)
            }
        }
    }

    fn read_container_range(&self, name: &str, offset: u64, size: u64) -> Result<Vec<u8>> {
        let index = self.find_container_index(name)?;
        let raw_path = self.root.join(format!("container_{index}.blob"));
        if raw_path.exists() {
            let mut f = File::open(&raw_path)?;
            f.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; size as usize];
            f.read_exact(&mut buf)?;
            return Ok(buf);
        }
        let zst_path = self.root.join(format!("container_{index}.blob.zst"));
        let mut compressed = Vec::new();
        File::open(&zst_path)
            .map_err(|_| StoreError::Corrupt {
                hash: name.to_string(),
                reason: "container missing in both raw and compressed form".into(),
            })?
            .read_to_end(&mut compressed)?;
        let raw = codec::zstd_decode(&compressed)?;
        let end = offset as usize + size as usize;
        if end > raw.len() {
            return Err(StoreError::Corrupt {
                hash: name.to_string(),
                reason: "range exceeds decompressed container length".into(),
            });
        }
        Ok(raw[offset as usize..end].to_vec())
    }

    /// Containers are named deterministically from their index, so the
    /// reverse mapping is a linear scan over plausible indices rather
    /// than a stored table — cheap since rotations are rare (every 1 GiB).
    fn find_container_index(&self, name: &str) -> Result<u64> {
        for i in 0.. {
            if container_name(i) == name {
                return Ok(i);
            }
            if i > 1_000_000 {
                break;
            }
        }
        Err(StoreError::Corrupt {
            hash: name.to_string(),
            reason: "no container index matches locator name".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn per_chunk_put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path(), false).unwrap();
        let hash = codec::hash_chunk(b"some chunk bytes");
        let locator = store.put(&hash, b"sealed bytes here").unwrap();
        let back = store.get(&locator).unwrap();
        assert_eq!(back, b"sealed bytes here");
    }

    #[test]
    fn per_chunk_put_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path(), false).unwrap();
        let hash = codec::hash_chunk(b"x");
        let a = store.put(&hash, b"first").unwrap();
        let b = store.put(&hash, b"first").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn container_mode_appends_multiple_chunks() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path(), true).unwrap();
        let h1 = codec::hash_chunk(b"chunk one");
        let h2 = codec::hash_chunk(b"chunk two");
        let l1 = store.put(&h1, b"aaaa").unwrap();
        let l2 = store.put(&h2, b"bbbbbb").unwrap();
        assert_eq!(store.get(&l1).unwrap(), b"aaaa");
        assert_eq!(store.get(&l2).unwrap(), b"bbbbbb");
    }

    #[test]
    fn container_name_is_deterministic() {
        assert_eq!(container_name(0), container_name(0));
        assert_ne!(container_name(0), container_name(1));
    }
}
