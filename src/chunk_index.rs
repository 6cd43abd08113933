//! C3 — Chunk Index: content hash → blob locator (spec §4.3).
//!
//! Primary form lives in the KV store under the `C|||:` namespace.
//! The optional *hierarchical* two-level hash-prefix block index trades
//! that for append-only files under `<db>/BLOBS/blocks/`, keeping the
//! KV store free of one entry per unique chunk so its own index stays
//! small. Record layout and flush threshold are grounded on
//! `lib/fio/blockindex.go` in the retrieval pack's `original_source/`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::blob::BlobLocator;
use crate::codec::ChunkHash;
use crate::error::Result;
use crate::kv::KvStore;

const CHUNK_PREFIX: &[u8] = b"C|||:";
const FLUSH_THRESHOLD: usize = 1000;

fn chunk_key(hash: &ChunkHash) -> Vec<u8> {
    let mut k = CHUNK_PREFIX.to_vec();
    k.extend_from_slice(hash);
    k
}

/// A serialized block-index record: `64B hash ‖ 8B offset ‖ 8B size ‖
/// 2B path_len ‖ path` (spec §4.3/§6), little-endian, no padding.
fn encode_record(hash: &ChunkHash, offset: u64, size: u64, path: &str) -> Vec<u8> {
    let path_bytes = path.as_bytes();
    let mut buf = Vec::with_capacity(64 + 8 + 8 + 2 + path_bytes.len());
    buf.extend_from_slice(hash);
    buf.write_u64::<LittleEndian>(offset).unwrap();
    buf.write_u64::<LittleEndian>(size).unwrap();
    buf.write_u16::<LittleEndian>(path_bytes.len() as u16).unwrap();
    buf.extend_from_slice(path_bytes);
    buf
}

fn decode_record(mut r: impl Read) -> std::io::Result<Option<(ChunkHash, u64, u64, String)>> {
    let mut hash = [0u8; 64];
    match r.read_exact(&mut hash) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let offset = r.read_u64::<LittleEndian>()?;
    let size = r.read_u64::<LittleEndian>()?;
    let path_len = r.read_u16::<LittleEndian>()? as usize;
    let mut path_bytes = vec![0u8; path_len];
    r.read_exact(&mut path_bytes)?;
    let path = String::from_utf8_lossy(&path_bytes).to_string();
    Ok(Some((hash, offset, size, path)))
}

/// In-memory buffer for one hash-prefix bucket, flushed to its `.bidx`
/// file every [`FLUSH_THRESHOLD`] records or on explicit flush/close.
struct BlockBuffer {
    pending: Vec<u8>,
    count: usize,
}

pub struct ChunkIndex {
    kv: std::sync::Arc<KvStore>,
    hierarchical: bool,
    blocks_dir: PathBuf,
    prefix_len: usize,
    buffers: Mutex<HashMap<Vec<u8>, BlockBuffer>>,
}

impl ChunkIndex {
    pub fn new(
        kv: std::sync::Arc<KvStore>,
        blobs_root: &Path,
        hierarchical: bool,
        prefix_len: usize,
    ) -> Result<Self> {
        let blocks_dir = blobs_root.join("blocks");
        if hierarchical {
            fs::create_dir_all(&blocks_dir)?;
        }
        Ok(Self {
            kv,
            hierarchical,
            blocks_dir,
            prefix_len,
            buffers: Mutex::new(HashMap::new()),
        })
    }

    fn block_path(&self, prefix: &[u8]) -> PathBuf {
        self.blocks_dir.join(format!("block_{}.bidx", hex::encode(prefix)))
    }

    pub fn contains(&self, hash: &ChunkHash) -> Result<bool> {
        if self.hierarchical {
            Ok(self.lookup_block(hash)?.is_some())
        } else {
            self.kv.contains(&chunk_key(hash))
        }
    }

    pub fn get(&self, hash: &ChunkHash) -> Result<Option<BlobLocator>> {
        if self.hierarchical {
            match self.lookup_block(hash)? {
                Some((offset, size, path)) => Ok(Some(locator_from_parts(offset, size, &path))),
                None => Ok(None),
            }
        } else {
            match self.kv.get(&chunk_key(hash))? {
                Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
                None => Ok(None),
            }
        }
    }

    pub fn put(&self, hash: &ChunkHash, locator: &BlobLocator) -> Result<()> {
        if self.hierarchical {
            self.append_block_record(hash, locator)
        } else {
            let encoded = rmp_serde::to_vec(locator)?;
            self.kv.set(&chunk_key(hash), &encoded)
        }
    }

    fn prefix_of(&self, hash: &ChunkHash) -> Vec<u8> {
        hash[..self.prefix_len].to_vec()
    }

    fn append_block_record(&self, hash: &ChunkHash, locator: &BlobLocator) -> Result<()> {
        let (path, offset, size) = locator_to_parts(locator);
        let record = encode_record(hash, offset, size, &path);
        let prefix = self.prefix_of(hash);
        let mut buffers = self.buffers.lock().unwrap();
        let buf = buffers.entry(prefix.clone()).or_insert_with(|| BlockBuffer {
            pending: Vec::new(),
            count: 0,
        });
        buf.pending.extend_from_slice(&record);
        buf.count += 1;
        if buf.count >= FLUSH_THRESHOLD {
            self.flush_buffer(&prefix, buf)?;
        }
        Ok(())
    }

    fn flush_buffer(&self, prefix: &[u8], buf: &mut BlockBuffer) -> Result<()> {
        if buf.pending.is_empty() {
            return Ok(());
        }
        let path = self.block_path(prefix);
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        f.write_all(&buf.pending)?;
        f.sync_data()?;
        buf.pending.clear();
        buf.count = 0;
        Ok(())
    }

    /// Flush every pending block buffer — call on store close or after
    /// an ingest batch (spec §4.3 "flushed on rotation or close").
    pub fn flush_all(&self) -> Result<()> {
        let mut buffers = self.buffers.lock().unwrap();
        for (prefix, buf) in buffers.iter_mut() {
            self.flush_buffer(prefix, buf)?;
        }
        Ok(())
    }

    /// Every known chunk hash. Used by deep-mode partial matching
    /// (spec §4.10), which must iterate the whole chunk namespace —
    /// expensive, and the spec notes it's only invoked for rare chunks.
    pub fn iter_all_hashes(&self) -> Result<Vec<ChunkHash>> {
        if self.hierarchical {
            self.flush_all()?;
            let mut out = Vec::new();
            if self.blocks_dir.exists() {
                for entry in fs::read_dir(&self.blocks_dir)? {
                    let entry = entry?;
                    let f = File::open(entry.path())?;
                    let mut r = BufReader::new(f);
                    while let Some((hash, _, _, _)) = decode_record(&mut r)? {
                        out.push(hash);
                    }
                }
            }
            Ok(out)
        } else {
            let mut out = Vec::new();
            for (key, _) in self.kv.scan_prefix(CHUNK_PREFIX)? {
                if key.len() == CHUNK_PREFIX.len() + 64 {
                    let mut hash = [0u8; 64];
                    hash.copy_from_slice(&key[CHUNK_PREFIX.len()..]);
                    out.push(hash);
                }
            }
            Ok(out)
        }
    }

    fn lookup_block(&self, hash: &ChunkHash) -> Result<Option<(u64, u64, String)>> {
        self.flush_all()?;
        let prefix = self.prefix_of(hash);
        let path = self.block_path(&prefix);
        if !path.exists() {
            return Ok(None);
        }
        let f = File::open(&path)?;
        let mut r = BufReader::new(f);
        while let Some((h, offset, size, rec_path)) = decode_record(&mut r)? {
            if &h == hash {
                return Ok(Some((offset, size, rec_path)));
            }
        }
        Ok(None)
    }
}

fn locator_to_parts(locator: &BlobLocator) -> (String, u64, u64) {
    match locator {
        BlobLocator::PerChunk { name } => (name.clone(), 0, 0),
        BlobLocator::Container { name, offset, size } => (name.clone(), *offset, *size),
    }
}

fn locator_from_parts(offset: u64, size: u64, path: &str) -> BlobLocator {
    if offset == 0 && size == 0 {
        BlobLocator::PerChunk { name: path.to_string() }
    } else {
        BlobLocator::Container {
            name: path.to_string(),
            offset,
            size,
        }
    }
}
