use std::path::{Path, PathBuf};

use airdrop_snapshot::checkpoint::{read_json, write_json_atomic};
use airdrop_snapshot::merkle::{ensure_published_root, write_snapshot};
use airdrop_snapshot::pipeline::run_batches;
use airdrop_snapshot::{
    build_tree, merge_batches, top_allocations, AllocationTable, CheckpointStore, JsonlEventStore, PipelineConfig,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "airdrop-snapshot", version, about = "Liquidity-mining airdrop snapshot pipeline")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration
    Check {
        #[arg(long, default_value = "airdrop.toml")]
        config: PathBuf,
    },

    /// Replay every batch that has no checkpoint yet
    Snapshot {
        #[arg(long, default_value = "airdrop.toml")]
        config: PathBuf,
    },

    /// Merge checkpointed batches into the raw entitlement table
    Merge {
        #[arg(long, default_value = "airdrop.toml")]
        config: PathBuf,
    },

    /// Build the Merkle snapshot from the raw entitlement table
    Build {
        #[arg(long, default_value = "airdrop.toml")]
        config: PathBuf,
    },

    /// Print the largest allocations of one checkpointed batch
    Report {
        #[arg(long, default_value = "airdrop.toml")]
        config: PathBuf,

        #[arg(long)]
        batch: String,

        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

fn init_tracing() {
    // AIRDROP_LOG, then RUST_LOG, then info
    let filter = std::env::var("AIRDROP_LOG")
        .unwrap_or_else(|_| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::load(path).with_context(|| format!("loading config {}", path.display()))
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Check { config } => {
            let config = load_config(&config)?;
            for batch in &config.batches {
                println!(
                    "{}: {} tokens, blocks {}..={}, airdrop {}",
                    batch.id,
                    batch.tokens.len(),
                    batch.timeframe.start,
                    batch.timeframe.end,
                    batch.airdrop
                );
            }
            println!("configuration ok");
        }

        Commands::Snapshot { config } => {
            let config = load_config(&config)?;
            let store = JsonlEventStore::new(&config.events_dir, config.page_size);
            let mut checkpoints = CheckpointStore::open(&config.checkpoint_path)
                .with_context(|| format!("opening checkpoints {}", config.checkpoint_path.display()))?;
            let summary = run_batches(&config, &store, &mut checkpoints).context("snapshot run aborted")?;
            println!(
                "completed: [{}] skipped: [{}]",
                summary.completed.join(", "),
                summary.skipped.join(", ")
            );
        }

        Commands::Merge { config } => {
            let config = load_config(&config)?;
            let checkpoints = CheckpointStore::open(&config.checkpoint_path)?;
            let missing: Vec<&str> = config
                .batches
                .iter()
                .filter(|b| !checkpoints.contains(&b.id))
                .map(|b| b.id.as_str())
                .collect();
            if !missing.is_empty() {
                warn!("[MERGE] batches without checkpoint: {}", missing.join(", "));
            }

            let merged = merge_batches(checkpoints.batches());
            write_json_atomic(&config.entitlements_path, &merged.table)
                .with_context(|| format!("writing {}", config.entitlements_path.display()))?;
            println!(
                "{} accounts, expected total {}, actual total {}",
                merged.table.len(),
                merged.reconciliation.expected,
                merged.reconciliation.actual
            );
            if !merged.reconciliation.is_balanced() {
                bail!("entitlement totals do not reconcile; review before building a root");
            }
        }

        Commands::Build { config } => {
            let config = load_config(&config)?;
            let table: AllocationTable = read_json(&config.entitlements_path)
                .with_context(|| format!("reading {}", config.entitlements_path.display()))?;
            let snapshot = build_tree(&table)?;
            ensure_published_root(config.published_root, snapshot.root)?;
            write_snapshot(&config.snapshot_path, &snapshot)
                .with_context(|| format!("publishing {}", config.snapshot_path.display()))?;
            info!("[MERKLE] published root {}", snapshot.root);
            println!("{}", snapshot.root);
        }

        Commands::Report { config, batch, top } => {
            let config = load_config(&config)?;
            let checkpoints = CheckpointStore::open(&config.checkpoint_path)?;
            let Some(result) = checkpoints.get(&batch) else {
                bail!("batch {} has no checkpoint", batch);
            };
            println!(
                "batch {}: {} accounts, total {}",
                batch,
                result.account_allocations.len(),
                result.total_allocated
            );
            for row in top_allocations(result, top) {
                let share = row.share_millipercent.to_string();
                let share = format!("{:0>4}", share);
                let (whole, frac) = share.split_at(share.len() - 3);
                println!("{}  {}  {}.{}%", row.account, row.amount, whole, frac);
            }
        }
    }
    Ok(())
}
