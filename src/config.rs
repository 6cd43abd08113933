//! Store-wide configuration (spec §1, §4.1-§4.4, §6 global flags).
//!
//! Mirrors the teacher's `PackOptions` shape: a plain struct with a
//! `Default`, constructed once at store-open time and threaded through every
//! operation via [`crate::store::Store`] rather than held in globals (spec
//! §9 "Globals").

/// Default chunk size: 256 KiB (spec §3 "Chunks").
pub const DEFAULT_CHONK_SIZE: usize = 256 * 1024;

/// Container rotation threshold (spec §4.2).
pub const MAX_CONTAINER_SIZE: u64 = 1 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory of the store (`<db>/` in spec.md).
    pub dbpath: std::path::PathBuf,
    /// Size of a chunk in bytes. Fixed for the lifetime of a store
    /// (spec §3 invariant 5) — changing it after any write invalidates
    /// offsets.
    pub chonk_size: usize,
    /// `--low`: cap the ingest worker semaphore at 1 (spec §5).
    pub low_resource: bool,
    /// `--quick`: skip both compression and encryption everywhere.
    pub quick: bool,
    /// `--container`: pack chunks into rotating containers instead of
    /// one blob file per chunk (spec §4.2).
    pub container_mode: bool,
    /// `--hierarchical`: route chunk locators through the two-level
    /// hash-prefix block index instead of the KV store (spec §4.3).
    pub hierarchical: bool,
    /// Hash-prefix length (in bytes) for the hierarchical block index.
    /// Default 1 (256 buckets), per spec §4.3.
    pub block_prefix_len: usize,
    /// 32-byte AES-256-GCM key. `None` disables encryption regardless of
    /// `quick` (key derivation from a password is a driver concern, not a
    /// core concern — spec §1 Non-goals).
    pub key: Option<[u8; 32]>,
}

impl StoreConfig {
    pub fn worker_count(&self) -> usize {
        if self.low_resource {
            1
        } else {
            2 * num_cpus()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dbpath: std::path::PathBuf::from("."),
            chonk_size: DEFAULT_CHONK_SIZE,
            low_resource: false,
            quick: false,
            container_mode: false,
            hierarchical: false,
            block_prefix_len: 1,
            key: None,
        }
    }
}

/// Best-effort CPU count; never returns 0.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
