//! Batch driver.
//!
//! Tokens of a batch are replayed in parallel, each with its own source and
//! state; their weighted tables are then folded into the batch table on the
//! calling thread, in configuration order. A batch is checkpointed only once
//! every token has replayed, so a failure never leaves half a batch on disk.

use std::collections::HashSet;

use alloy_primitives::Address;
use rayon::prelude::*;
use tracing::{info, info_span};

use crate::accumulator::{compute_token_rewards, ReplayParams};
use crate::allocation::AllocationTable;
use crate::blend::{blend_batch, BatchResult};
use crate::checkpoint::CheckpointStore;
use crate::config::{BatchConfig, PipelineConfig, TokenConfig};
use crate::error::Result;
use crate::events::EventStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Batches computed and recorded by this run.
    pub completed: Vec<String>,
    /// Batches already present in the checkpoint file.
    pub skipped: Vec<String>,
}

/// Runs every configured batch that has no checkpoint yet.
///
/// Stops at the first failing batch; batches recorded before it stay on disk
/// and are skipped when the run is repeated.
pub fn run_batches(
    config: &PipelineConfig,
    store: &dyn EventStore,
    checkpoints: &mut CheckpointStore,
) -> Result<PipelineSummary> {
    let mut summary = PipelineSummary::default();

    for batch in &config.batches {
        if checkpoints.contains(&batch.id) {
            info!("[SNAPSHOT] batch {} already checkpointed, skipping", batch.id);
            summary.skipped.push(batch.id.clone());
            continue;
        }
        let result = snapshot_batch(config, batch, store)?;
        checkpoints.record(&batch.id, result)?;
        summary.completed.push(batch.id.clone());
    }

    info!(
        "[SNAPSHOT] done: {} completed, {} skipped",
        summary.completed.len(),
        summary.skipped.len()
    );
    Ok(summary)
}

/// Replays and blends one batch without touching the checkpoint file.
pub fn snapshot_batch(config: &PipelineConfig, batch: &BatchConfig, store: &dyn EventStore) -> Result<BatchResult> {
    let _span = info_span!("batch", id = %batch.id).entered();
    let airdrop = batch.airdrop_amount()?;
    let ignore = config.ignore_set(batch);
    let remove = config.remove_set(batch);

    info!(
        "[SNAPSHOT] batch {}: {} tokens, blocks {}..={}",
        batch.id,
        batch.tokens.len(),
        batch.timeframe.start,
        batch.timeframe.end
    );

    let contributions: Vec<AllocationTable> = batch
        .tokens
        .par_iter()
        .map(|token| replay_one(config, batch, token, store, &ignore, &remove))
        .collect::<Result<Vec<_>>>()?;

    let mut weighted = AllocationTable::new();
    for contribution in &contributions {
        weighted.merge(contribution);
    }

    blend_batch(&batch.id, &weighted, &airdrop)
}

fn replay_one(
    config: &PipelineConfig,
    batch: &BatchConfig,
    token: &TokenConfig,
    store: &dyn EventStore,
    ignore: &HashSet<Address>,
    remove: &HashSet<Address>,
) -> Result<AllocationTable> {
    let start_block = config.start_block(token);
    let params = ReplayParams {
        token: token.address,
        start_block,
        window: batch.timeframe,
        skip_initial_record: start_block == token.created_at,
        ignore,
        remove,
        weight: token.weight.to_fixed()?,
    };
    let mut source = store.open(token.address, start_block, batch.timeframe.end)?;
    compute_token_rewards(source.as_mut(), &params)
}
