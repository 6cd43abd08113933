//! `FsIndexer` — external collaborator trait (spec §1 Non-goals, §4.7
//! step 3). exFAT (or any other filesystem) grammar is out of scope;
//! the core only consumes `{name, file_start, file_size}` records.

/// A single file discovered inside a partition by a filesystem indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFileRecord {
    pub name: String,
    pub file_start: u64,
    pub file_size: u64,
}

/// Yields the files found inside a partition's byte range. Errors of
/// kind "incompatible filesystem" are the indexer's to report via
/// `Err`; ingest logs and skips them rather than treating them as fatal
/// (spec §4.7 "Cancellation / partial failure").
pub trait FsIndexer: Send + Sync {
    fn index(&self, partition_data: &[u8]) -> Result<Vec<IndexedFileRecord>, String>;
}

/// Minimal default: recognizes nothing. Any real filesystem grammar
/// (exFAT, etc.) is supplied by the driver, not the core.
pub struct NullIndexer;

impl FsIndexer for NullIndexer {
    fn index(&self, _partition_data: &[u8]) -> Result<Vec<IndexedFileRecord>, String> {
        Err("incompatible filesystem: no indexer configured".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_indexer_reports_incompatible_filesystem() {
        let indexer = NullIndexer;
        let result = indexer.index(&[0u8; 10]);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("incompatible filesystem"));
    }
}
