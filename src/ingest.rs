//! C7 — Ingest Pipeline (spec §4.7): preflight, partition discovery,
//! optional parallel indexing, bounded-semaphore chunk ingest, and the
//! two-phase "data then commit" finalize that makes an evidence file
//! visible only once every chunk and relation for it is durable.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use tracing::{debug, info, warn};

use crate::artifact::{self, Evidence, Indexed, Internals, Partition, Span};
use crate::codec;
use crate::concurrency::Semaphore;
use crate::error::Result;
use crate::fs_index::FsIndexer;
use crate::partition::PartitionReader;
use crate::store::Store;

/// Result of ingesting one evidence file: its content hash and whether
/// any new work was actually performed (vs. a pure alias add / no-op).
pub struct IngestOutcome {
    pub evi_hash: Vec<u8>,
    pub already_complete: bool,
}

/// Evidence sits at the top of the ancestry chain, so its aliases carry
/// no parent/grandparent hash (spec §3 "Aliases are sets").
fn evidence_alias(name: &str) -> String {
    artifact::make_alias("", "", name)
}

pub fn ingest_evidence(
    store: &Store,
    path: &Path,
    name: &str,
    partitions: &dyn PartitionReader,
    indexer: &dyn FsIndexer,
    sync_index: bool,
) -> Result<IngestOutcome> {
    let span = tracing::info_span!("store", path = %path.display(), name);
    let _guard = span.enter();

    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let evi_hash = codec::hash_bytes_256(&mmap).to_vec();
    let size = mmap.len() as u64;

    let alias = evidence_alias(name);
    match store.registry.get_evi(&evi_hash)? {
        Some(mut record) if record.completed => {
            if record.names.contains(&alias) {
                debug!("evidence already complete and alias already known, no-op");
                return Ok(IngestOutcome {
                    evi_hash,
                    already_complete: true,
                });
            }
            record.names.insert(alias);
            store.registry.set_evi(&evi_hash, &record)?;
            info!("added new alias to already-complete evidence");
            return Ok(IngestOutcome {
                evi_hash,
                already_complete: true,
            });
        }
        Some(mut record) => {
            // Interrupted previous run: resume. All writes below are
            // idempotent by content so re-running them is harmless.
            record.names.insert(alias);
            store.registry.set_evi(&evi_hash, &record)?;
            warn!("resuming incomplete evidence ingest");
        }
        None => {
            let mut names = std::collections::BTreeSet::new();
            names.insert(alias);
            let record = Evidence {
                names,
                size,
                start: 0,
                completed: false,
                kind: "raw".to_string(),
                internals: Internals::new(),
            };
            store.registry.set_evi(&evi_hash, &record)?;
        }
    }

    let ranges = partitions.read_partitions(&mmap);
    if sync_index {
        index_partitions(store, &mmap, &evi_hash, &ranges, indexer)?;
    } else {
        let worker_cap = ranges.len().max(4);
        index_partitions_parallel(store, &mmap, &evi_hash, &ranges, indexer, worker_cap)?;
    }

    ingest_chunks(store, &mmap, &evi_hash, size)?;

    let mut record = store
        .registry
        .get_evi(&evi_hash)?
        .expect("evidence record created above");
    record.completed = true;
    store.registry.set_evi(&evi_hash, &record)?;
    info!("evidence ingest complete");

    Ok(IngestOutcome {
        evi_hash,
        already_complete: false,
    })
}

fn index_partitions(
    store: &Store,
    mmap: &Mmap,
    evi_hash: &[u8],
    ranges: &[crate::partition::PartitionRange],
    indexer: &dyn FsIndexer,
) -> Result<()> {
    for range in ranges {
        index_one_partition(store, mmap, evi_hash, *range, indexer)?;
    }
    Ok(())
}

/// Background-capable variant, bounded at `max(4, #partitions)` workers
/// per spec §4.7 step 3 ("real disks rarely have more").
fn index_partitions_parallel(
    store: &Store,
    mmap: &Mmap,
    evi_hash: &[u8],
    ranges: &[crate::partition::PartitionRange],
    indexer: &dyn FsIndexer,
    worker_cap: usize,
) -> Result<()> {
    let sem = Semaphore::new(worker_cap);
    std::thread::scope(|scope| {
        let handles: Vec<_> = ranges
            .iter()
            .map(|range| {
                let sem = sem.clone();
                scope.spawn(move || {
                    let _permit = sem.acquire();
                    index_one_partition(store, mmap, evi_hash, *range, indexer)
                })
            })
            .collect();
        for h in handles {
            h.join().expect("indexer thread panicked")?;
        }
        Ok(())
    })
}

fn index_one_partition(
    store: &Store,
    mmap: &Mmap,
    evi_hash: &[u8],
    range: crate::partition::PartitionRange,
    indexer: &dyn FsIndexer,
) -> Result<()> {
    let slice = &mmap[range.start as usize..(range.start + range.size) as usize];
    let p_hash = codec::hash_bytes_256(slice).to_vec();

    let mut evi_record = store
        .registry
        .get_evi(evi_hash)?
        .expect("evidence record must exist before partition indexing");
    evi_record.internals.insert(
        p_hash.clone(),
        Span {
            start: range.start,
            end: range.start + range.size,
        },
    );
    store.registry.set_evi(evi_hash, &evi_record)?;

    let files = match indexer.index(slice) {
        Ok(files) => files,
        Err(reason) => {
            warn!(%reason, "partition has incompatible filesystem, stored as raw");
            store.registry.set_partition(
                &p_hash,
                &Partition {
                    names: std::collections::BTreeSet::new(),
                    size: range.size,
                    start: range.start,
                    internals: Internals::new(),
                },
            )?;
            return Ok(());
        }
    };

    let p_hash_hex = hex::encode(&p_hash);
    let evi_hash_hex = hex::encode(evi_hash);

    let mut partition_internals = Internals::new();
    let mut accumulated: BTreeMap<Vec<u8>, Indexed> = BTreeMap::new();
    for rec in files {
        let abs_start = range.start + rec.file_start;
        let file_slice = &mmap[abs_start as usize..(abs_start + rec.file_size) as usize];
        let i_hash = codec::hash_bytes_256(file_slice).to_vec();
        let alias = artifact::make_alias(&p_hash_hex, &evi_hash_hex, &rec.name);
        partition_internals.insert(
            i_hash.clone(),
            Span {
                start: abs_start,
                end: abs_start + rec.file_size,
            },
        );
        accumulated
            .entry(i_hash)
            .and_modify(|existing| {
                existing.names.insert(alias.clone());
            })
            .or_insert_with(|| {
                let mut names = std::collections::BTreeSet::new();
                names.insert(alias.clone());
                Indexed {
                    names,
                    size: rec.file_size,
                    start: abs_start,
                }
            });
    }

    for (hash, record) in accumulated {
        let merged = match store.registry.get_indexed(&hash)? {
            Some(mut existing) => {
                existing.names.extend(record.names);
                existing
            }
            None => record,
        };
        store.registry.set_indexed(&hash, &merged)?;
    }

    store.registry.set_partition(
        &p_hash,
        &Partition {
            names: std::collections::BTreeSet::new(),
            size: range.size,
            start: range.start,
            internals: partition_internals,
        },
    )?;

    Ok(())
}

/// Chunk ingest: spec §4.7 step 4. Each chunk-sized slice is hashed,
/// written to the blob store if new, and recorded in both relation
/// directions. Bounded by a semaphore of `StoreConfig::worker_count`.
fn ingest_chunks(store: &Store, mmap: &Mmap, evi_hash: &[u8], size: u64) -> Result<()> {
    let chonk_size = store.config.chonk_size as u64;
    let worker_count = store.config.worker_count();
    let sem = Semaphore::new(worker_count);

    std::thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::new();
        let mut off = 0u64;
        while off < size {
            let this_size = chonk_size.min(size - off);
            let sem = sem.clone();
            let evi_hash = evi_hash.to_vec();
            handles.push(scope.spawn(move || -> Result<()> {
                let _permit = sem.acquire();
                let slice = &mmap[off as usize..(off + this_size) as usize];
                let chunk_hash = codec::hash_chunk(slice);

                if !store.chunks.contains(&chunk_hash)? {
                    let processed = codec::process(slice, store.config.key.as_ref(), store.config.quick)?;
                    let locator = store.blobs.put(&chunk_hash, &processed)?;
                    store.chunks.put(&chunk_hash, &locator)?;
                    debug!(offset = off, "wrote new chunk");
                } else {
                    debug!(offset = off, "chunk already present, deduped");
                }

                store.relations.put_forward(&evi_hash, off, &chunk_hash)?;
                store.relations.put_reverse(&chunk_hash, off, &evi_hash)?;
                Ok(())
            }));
            off += this_size;
        }
        for h in handles {
            h.join().expect("chunk worker panicked")?;
        }
        Ok(())
    })?;

    store.chunks.flush_all()?;
    Ok(())
}
