//! # evidentia — deduplicating, encrypted, content-addressed evidence store
//!
//! Core guarantees:
//! - Chunk identity is content-addressed (SHA3-512); a chunk is written at
//!   most once regardless of how many artifacts reference it.
//! - The AES-GCM nonce is derived from the store key, not random, so
//!   identical plaintext always seals to identical ciphertext — required
//!   for blob-level dedup (see [`codec`]).
//! - An evidence file only becomes visible to readers once every chunk,
//!   forward relation and reverse relation for it has been durably
//!   committed (see [`ingest`]).
//! - All non-blob state lives in one ordered KV store; chunk bytes live
//!   separately in the blob store (see [`kv`], [`blob`]).

pub mod artifact;
pub mod blob;
pub mod chunk_index;
pub mod codec;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod fs_index;
pub mod ingest;
pub mod kdf;
pub mod kv;
pub mod partition;
pub mod query;
pub mod relation;
pub mod store;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use store::Store;
