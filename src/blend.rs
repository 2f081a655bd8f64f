//! Weight blender.
//!
//! Turns a batch's weighted-balance table into token allocations and merges
//! checkpointed batches into the raw entitlement table.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::allocation::AllocationTable;
use crate::error::{Result, SnapshotError};
use crate::units::hex_amount;

/// One batch's final allocation, as stored in the checkpoint file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub account_allocations: AllocationTable,
    #[serde(with = "hex_amount")]
    pub total_allocated: BigUint,
}

/// Splits `airdrop` across the accounts of `weighted` pro rata:
/// `allocation = weighted * airdrop / totalWeight`, floored, zeros dropped.
pub fn blend_batch(batch_id: &str, weighted: &AllocationTable, airdrop: &BigUint) -> Result<BatchResult> {
    let total_weight = weighted.total();
    if total_weight.is_zero() {
        return Err(SnapshotError::ZeroTotalWeight {
            batch: batch_id.to_string(),
        });
    }

    let mut allocations = AllocationTable::new();
    for (account, weight) in weighted {
        let amount = weight * airdrop / &total_weight;
        if !amount.is_zero() {
            allocations.credit(*account, &amount);
        }
    }
    let total_allocated = allocations.total();

    info!(
        "[BLEND] batch {}: {} accounts, allocated {} of {}",
        batch_id,
        allocations.len(),
        total_allocated,
        airdrop
    );
    Ok(BatchResult {
        account_allocations: allocations,
        total_allocated,
    })
}

/// Expected (sum of batch totals) against actual (sum of merged table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub expected: BigUint,
    pub actual: BigUint,
}

impl Reconciliation {
    pub fn is_balanced(&self) -> bool {
        self.expected == self.actual
    }
}

#[derive(Debug, Clone)]
pub struct MergedEntitlements {
    pub table: AllocationTable,
    pub reconciliation: Reconciliation,
    /// Batch ids merged, in order.
    pub batches: Vec<String>,
}

/// Additively merges every batch into one entitlement table.
///
/// Keyed by batch id, so a batch recorded twice is still counted once.
/// A reconciliation mismatch is logged and returned, never swallowed.
pub fn merge_batches(results: &BTreeMap<String, BatchResult>) -> MergedEntitlements {
    let mut table = AllocationTable::new();
    let mut expected = BigUint::zero();

    for (id, result) in results {
        table.merge(&result.account_allocations);
        expected += &result.total_allocated;
        info!(
            "[MERGE] batch {} added {} accounts (total {})",
            id,
            result.account_allocations.len(),
            result.total_allocated
        );
    }

    let reconciliation = Reconciliation {
        actual: table.total(),
        expected,
    };
    if reconciliation.is_balanced() {
        info!(
            "[MERGE] {} batches, {} accounts, total {}",
            results.len(),
            table.len(),
            reconciliation.actual
        );
    } else {
        warn!(
            "[MERGE] total mismatch: expected {} actual {}",
            reconciliation.expected, reconciliation.actual
        );
    }

    MergedEntitlements {
        table,
        reconciliation,
        batches: results.keys().cloned().collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationShare {
    pub account: Address,
    pub amount: BigUint,
    /// Share of the batch total in thousandths of a percent (100000 = 100%).
    pub share_millipercent: BigUint,
}

/// The `n` largest allocations of a batch, largest first. Ties keep address order.
pub fn top_allocations(result: &BatchResult, n: usize) -> Vec<AllocationShare> {
    let mut rows: Vec<(&Address, &BigUint)> = result.account_allocations.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1));

    rows.into_iter()
        .take(n)
        .map(|(account, amount)| {
            let share_millipercent = if result.total_allocated.is_zero() {
                BigUint::zero()
            } else {
                amount * BigUint::from(100_000u32) / &result.total_allocated
            };
            AllocationShare {
                account: *account,
                amount: amount.clone(),
                share_millipercent,
            }
        })
        .collect()
}
