//! Pipeline configuration.
//!
//! Loaded from TOML. Relative paths are resolved against the directory of
//! the config file; a few knobs can be overridden from the environment.

mod batch;

pub use batch::{BatchConfig, DecimalAmount, Timeframe, TokenConfig};

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SnapshotError};
use crate::events::DEFAULT_PAGE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Batch-id keyed checkpoint file.
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    /// Merged raw entitlement table.
    #[serde(default = "default_entitlements_path")]
    pub entitlements_path: PathBuf,

    /// Published MerkleSnapshot.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Directory holding `<token>.jsonl` transfer logs.
    #[serde(default = "default_events_dir")]
    pub events_dir: PathBuf,

    /// Replay never starts before this block, whatever a token's creation block.
    #[serde(default)]
    pub start_block_floor: u64,

    /// Events per page when reading transfer logs.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Root already published on-chain; a rebuild must reproduce it.
    #[serde(default)]
    pub published_root: Option<B256>,

    /// Applied to every batch in addition to the batch's own lists.
    #[serde(default)]
    pub ignore_addresses: Vec<Address>,
    #[serde(default)]
    pub remove_addresses: Vec<Address>,

    pub batches: Vec<BatchConfig>,
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("partial-snapshots.json")
}
fn default_entitlements_path() -> PathBuf {
    PathBuf::from("raw-snapshot.json")
}
fn default_snapshot_path() -> PathBuf {
    PathBuf::from("airdrop-snapshot.json")
}
fn default_events_dir() -> PathBuf {
    PathBuf::from("events")
}
fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// `AIRDROP_PAGE_SIZE` overrides the configured page size.
fn page_size_override() -> Option<usize> {
    std::env::var("AIRDROP_PAGE_SIZE")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
}

impl PipelineConfig {
    /// Load, resolve paths, apply env overrides and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SnapshotError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to read config {}: {}", path.display(), e),
            ))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        if let Some(page_size) = page_size_override() {
            info!("[CONFIG] AIRDROP_PAGE_SIZE override: {}", page_size);
            config.page_size = page_size;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse without touching the filesystem or environment.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.checkpoint_path,
            &mut self.entitlements_path,
            &mut self.snapshot_path,
            &mut self.events_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(SnapshotError::InvalidConfig("page_size must be positive".to_string()));
        }
        if self.batches.is_empty() {
            return Err(SnapshotError::InvalidConfig("no batches configured".to_string()));
        }
        let mut ids = HashSet::new();
        for batch in &self.batches {
            if !ids.insert(batch.id.as_str()) {
                return Err(SnapshotError::InvalidConfig(format!("duplicate batch id {}", batch.id)));
            }
            batch.validate()?;
        }
        Ok(())
    }

    pub fn batch(&self, id: &str) -> Option<&BatchConfig> {
        self.batches.iter().find(|b| b.id == id)
    }

    /// Global ignore list plus the batch's own.
    pub fn ignore_set(&self, batch: &BatchConfig) -> HashSet<Address> {
        self.ignore_addresses
            .iter()
            .chain(&batch.ignore_addresses)
            .copied()
            .collect()
    }

    /// Global remove list plus the batch's own.
    pub fn remove_set(&self, batch: &BatchConfig) -> HashSet<Address> {
        self.remove_addresses
            .iter()
            .chain(&batch.remove_addresses)
            .copied()
            .collect()
    }

    /// First block to replay for a token.
    pub fn start_block(&self, token: &TokenConfig) -> u64 {
        token.created_at.max(self.start_block_floor)
    }
}
