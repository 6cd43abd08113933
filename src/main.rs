use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use evidentia::config::StoreConfig;
use evidentia::fs_index::NullIndexer;
use evidentia::partition::WholeFileReader;
use evidentia::query::{near, restore, search};
use evidentia::store::Store;
use evidentia::{ingest, kdf};

#[derive(Parser)]
#[command(name = "evidentia", version, about = "Deduplicating evidence store for forensic disk images")]
struct Cli {
    /// Root directory of the store.
    #[arg(long, global = true, default_value = ".")]
    dbpath: PathBuf,
    /// Password used to derive the store's AES-256-GCM key.
    #[arg(long, global = true)]
    password: Option<String>,
    /// Chunk size in KiB.
    #[arg(long, global = true, default_value = "256")]
    chonksize: u64,
    /// Low-resource mode: cap the worker semaphore at 1.
    #[arg(long, global = true)]
    low: bool,
    /// Skip compression and encryption entirely.
    #[arg(long, global = true)]
    quick: bool,
    /// Pack chunks into rotating containers instead of per-chunk blobs.
    #[arg(long, global = true)]
    container: bool,
    /// Route chunk locators through the hierarchical block index.
    #[arg(long, global = true)]
    hierarchical: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a file as a new evidence artifact.
    Store {
        input: PathBuf,
        /// Alias to record for this content; defaults to the file name.
        #[arg(long)]
        name: Option<String>,
    },
    /// List all evidence records and their completion state.
    List,
    /// Restore an artifact's bytes by content hash (hex).
    Restore {
        hash: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Find artifacts sharing chunks with a target.
    Near {
        #[command(subcommand)]
        direction: NearDirection,
    },
    /// Search for a byte pattern (regex or literal) across all artifacts.
    Search { pattern: String },
    /// Delete the store directory entirely.
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum NearDirection {
    /// Baseline NeAR: chunks shared with at least one other artifact.
    In { hash: String },
    /// Deep NeAR: also attempts partial matches for otherwise-unique chunks.
    Out { hash: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let key = match &cli.password {
        Some(pwd) => {
            let salt = kdf::salt_for_path(&cli.dbpath);
            Some(kdf::derive_key(pwd, &salt).context("deriving store key from password")?)
        }
        None => None,
    };

    let config = StoreConfig {
        dbpath: cli.dbpath.clone(),
        chonk_size: (cli.chonksize as usize) * 1024,
        low_resource: cli.low,
        quick: cli.quick,
        container_mode: cli.container,
        hierarchical: cli.hierarchical,
        block_prefix_len: 1,
        key,
    };

    match cli.command {
        Commands::Store { input, name } => {
            let store = Store::open(config)?;
            let alias = name.unwrap_or_else(|| {
                input
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| input.to_string_lossy().to_string())
            });
            let outcome = ingest::ingest_evidence(
                &store,
                &input,
                &alias,
                &WholeFileReader,
                &NullIndexer,
                true,
            )
            .with_context(|| format!("ingesting {}", input.display()))?;
            println!("evidence: {}", hex::encode(&outcome.evi_hash));
            if outcome.already_complete {
                println!("(already stored)");
            }
        }

        Commands::List => {
            let store = Store::open(config)?;
            for (hash, record) in store.registry.list_evidence()? {
                println!(
                    "{}  completed={}  aliases={}  size={}",
                    hex::encode(&hash),
                    record.completed,
                    record.names.len(),
                    record.size
                );
            }
        }

        Commands::Restore { hash, output } => {
            let store = Store::open(config)?;
            let target = hex::decode(&hash).context("hash must be hex-encoded")?;
            let mut out = std::fs::File::create(&output)?;
            restore::restore(&store, &target, &mut out)?;
            println!("restored to {}", output.display());
        }

        Commands::Near { direction } => {
            let store = Store::open(config)?;
            let (hash_str, deep) = match direction {
                NearDirection::In { hash } => (hash, false),
                NearDirection::Out { hash } => (hash, true),
            };
            let target = hex::decode(&hash_str).context("hash must be hex-encoded")?;
            let result = near::near(&store, &target, deep)?;
            for (hash, confidence) in result {
                println!("{}  {:.1}%", hex::encode(&hash), confidence);
            }
        }

        Commands::Search { pattern } => {
            let store = Store::open(config)?;
            let reports = search::search(&store, &pattern)?;
            for report in reports {
                println!(
                    "{}  matches={}  aliases={:?}",
                    hex::encode(&report.artifact_hash),
                    report.matches.len(),
                    report.aliases
                );
                for m in &report.matches {
                    println!("  @{}  {:?}", m.offset, String::from_utf8_lossy(&m.text));
                }
            }
        }

        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to delete {} without --yes", cli.dbpath.display());
            }
            std::fs::remove_dir_all(&cli.dbpath)
                .with_context(|| format!("removing {}", cli.dbpath.display()))?;
            println!("removed {}", cli.dbpath.display());
        }
    }

    Ok(())
}
