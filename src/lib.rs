//! Liquidity-mining airdrop snapshots.
//!
//! Replays token transfer logs into time-weighted rewards, blends them into
//! per-batch allocations, and commits the merged entitlements to a Merkle
//! root with per-account claim proofs.

pub mod accumulator;
pub mod allocation;
pub mod blend;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod events;
pub mod merkle;
pub mod pipeline;
pub mod proof;
pub mod units;

pub use accumulator::{compute_token_rewards, replay_token, AccruedRewards, ReplayParams, TokenReplay};
pub use allocation::AllocationTable;
pub use blend::{blend_batch, merge_batches, top_allocations, BatchResult, MergedEntitlements, Reconciliation};
pub use checkpoint::CheckpointStore;
pub use config::{BatchConfig, PipelineConfig, Timeframe, TokenConfig};
pub use error::{Result, SnapshotError};
pub use events::{EventSource, EventStore, JsonlEventStore, MemoryEventStore, TransferEvent};
pub use merkle::{build_tree, leaf, MerkleSnapshot, MerkleTree};
pub use proof::{create_proof, verify, ClaimProof, ProofService};
