use std::path::PathBuf;
use std::process::ExitCode;

use airdrop_snapshot::merkle::read_snapshot;
use airdrop_snapshot::{verify, ProofService};
use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "airdrop-proof", version, about = "Claim proofs for a published airdrop snapshot")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the claim proof of one account as JSON
    Proof {
        #[arg(long, default_value = "airdrop-snapshot.json")]
        snapshot: PathBuf,

        #[arg(long)]
        address: Address,
    },

    /// Check a proof against a root; exits non-zero when it does not verify
    Verify {
        #[arg(long)]
        root: B256,

        #[arg(long)]
        leaf: B256,

        /// Comma-separated sibling hashes, leaf level first
        #[arg(long, value_delimiter = ',', num_args = 0..)]
        proof: Vec<B256>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Proof { snapshot, address } => {
            let loaded = read_snapshot(&snapshot).with_context(|| format!("reading {}", snapshot.display()))?;
            let service = ProofService::new(loaded).context("snapshot leaves do not match its root")?;
            match service.proof(&address) {
                Some(claim) => {
                    println!("{}", serde_json::to_string_pretty(&claim)?);
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("{} has no entitlement in this snapshot", address);
                    Ok(ExitCode::from(2))
                }
            }
        }

        Commands::Verify { root, leaf, proof } => {
            let ok = verify(&proof, root, leaf);
            println!("{}", ok);
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
    }
}
