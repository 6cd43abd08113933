//! C1 — Codec: AES-256-GCM seal/unseal, Zstd encode/decode, and the two
//! content hashes the rest of the store keys on (spec §4.1).
//!
//! # Deterministic nonce
//!
//! The AES-GCM nonce is `SHA-256(key)[..12]` — fixed per store, not random
//! per message. This is a deliberate departure from the teacher's
//! `crypto::encrypt` (which generates a fresh random nonce per call, correct
//! for an archive format where the same plaintext is expected to appear at
//! most once) because this store must dedup *encrypted* blob bytes: two
//! identical chunks must seal to identical ciphertext so that the blob layer
//! never has to decrypt before it can tell two chunks apart by content. A
//! random nonce would defeat that. The same key must therefore never be used
//! to encrypt anything else, and implementations must not "fix" this into a
//! random nonce without a design change (see spec §9).
//!
//! Grounded on the `blob_store` crate in the retrieval pack, which documents
//! exactly this trade-off for the same reason.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest as Sha2Digest, Sha256};
use sha3::{Digest as Sha3Digest, Sha3_256, Sha3_512};
use std::io::Read;

use crate::error::{Result, StoreError};

pub const FILE_HASH_LEN: usize = 32;
pub const CHUNK_HASH_LEN: usize = 64;

pub type FileHash = [u8; FILE_HASH_LEN];
pub type ChunkHash = [u8; CHUNK_HASH_LEN];

/// SHA3-256 over an entire stream (spec §4.1 `hash_file`).
pub fn hash_file<R: Read>(mut stream: R) -> Result<FileHash> {
    let mut hasher = Sha3_256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// SHA3-256 over an in-memory byte range (used for partitions/indexed
/// files, whose bytes already live in the memory-mapped input).
pub fn hash_bytes_256(data: &[u8]) -> FileHash {
    Sha3_256::digest(data).into()
}

/// SHA3-512 over a chunk's raw plaintext bytes (spec §4.1 `hash_chunk`).
/// Chunk identity — never computed over compressed or encrypted bytes.
pub fn hash_chunk(data: &[u8]) -> ChunkHash {
    Sha3_512::digest(data).into()
}

/// Derive the deterministic 12-byte AES-GCM nonce for this store's key.
fn nonce_for_key(key: &[u8; 32]) -> [u8; 12] {
    let digest = Sha256::digest(key);
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&digest[..12]);
    nonce
}

/// AES-256-GCM seal with the store's deterministic nonce.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| StoreError::Crypto(e.to_string()))?;
    let nonce = nonce_for_key(key);
    cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| StoreError::Crypto(e.to_string()))
}

/// AES-256-GCM unseal. The GCM tag makes this also the integrity check
/// for the ciphertext (spec §3 invariant 3, partially — the remainder is
/// the chunk hash check done by callers after decompression).
pub fn unseal(key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| StoreError::Crypto(e.to_string()))?;
    let nonce = nonce_for_key(key);
    cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext)
        .map_err(|_| StoreError::Crypto("decryption failed — wrong key or corrupted data".into()))
}

/// Default Zstd compression level used for blobs and KV payload framing.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

pub fn zstd_encode(data: &[u8], level: i32) -> Result<Vec<u8>> {
    zstd::encode_all(data, level).map_err(|e| StoreError::Codec(e.to_string()))
}

pub fn zstd_decode(data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data).map_err(|e| StoreError::Codec(e.to_string()))
}

/// Process plaintext for on-disk storage: `quick=false` runs
/// Zstd-then-seal; `quick=true` passes bytes through unchanged (spec §4.1).
pub fn process(data: &[u8], key: Option<&[u8; 32]>, quick: bool) -> Result<Vec<u8>> {
    if quick {
        return Ok(data.to_vec());
    }
    let compressed = zstd_encode(data, DEFAULT_ZSTD_LEVEL)?;
    match key {
        Some(k) => seal(k, &compressed),
        None => Ok(compressed),
    }
}

/// Inverse of [`process`].
pub fn unprocess(data: &[u8], key: Option<&[u8; 32]>, quick: bool) -> Result<Vec<u8>> {
    if quick {
        return Ok(data.to_vec());
    }
    let compressed = match key {
        Some(k) => unseal(k, data)?,
        None => data.to_vec(),
    };
    zstd_decode(&compressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_chunk_is_64_bytes_and_stable() {
        let a = hash_chunk(b"hello world");
        let b = hash_chunk(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), CHUNK_HASH_LEN);
    }

    #[test]
    fn hash_file_matches_hash_bytes_256_for_whole_input() {
        let data = b"the quick brown fox";
        let a = hash_bytes_256(data);
        let b = hash_file(std::io::Cursor::new(data)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn seal_is_deterministic_per_key() {
        let key = [7u8; 32];
        let a = seal(&key, b"same plaintext").unwrap();
        let b = seal(&key, b"same plaintext").unwrap();
        assert_eq!(a, b, "identical plaintext must seal to identical ciphertext under one key");
    }

    #[test]
    fn seal_unseal_roundtrip() {
        let key = [9u8; 32];
        let plain = b"forensic evidence payload";
        let sealed = seal(&key, plain).unwrap();
        let opened = unseal(&key, &sealed).unwrap();
        assert_eq!(opened, plain);
    }

    #[test]
    fn different_keys_seal_differently() {
        let a = seal(&[1u8; 32], b"x").unwrap();
        let b = seal(&[2u8; 32], b"x").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn process_quick_is_passthrough() {
        let data = b"raw bytes";
        let out = process(data, None, true).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn process_unprocess_roundtrip_with_key() {
        let key = [3u8; 32];
        let data = vec![42u8; 4096];
        let stored = process(&data, Some(&key), false).unwrap();
        let back = unprocess(&stored, Some(&key), false).unwrap();
        assert_eq!(back, data);
    }
}
