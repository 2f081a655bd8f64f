use alloy_primitives::{Address, B256};
use num_bigint::BigUint;
use thiserror::Error;

/// Everything that can stop a snapshot run.
///
/// Lookup misses (an address absent from a snapshot) are not errors; they are
/// reported as `None` by the proof service.
#[derive(Error, Debug)]
pub enum SnapshotError {
    // ---- input exhaustion ----
    #[error("no transfers found for token {token} in blocks {from_block}..={to_block}")]
    NoTransfers {
        token: Address,
        from_block: u64,
        to_block: u64,
    },
    #[error(
        "transfer out of order for token {token}: ({block}, {log_position}) follows ({prev_block}, {prev_log_position})"
    )]
    EventOrder {
        token: Address,
        block: u64,
        log_position: u64,
        prev_block: u64,
        prev_log_position: u64,
    },
    #[error("transfer at block {block} for token {token} is outside {from_block}..={to_block}")]
    EventOutOfRange {
        token: Address,
        block: u64,
        from_block: u64,
        to_block: u64,
    },

    // ---- invariant violations ----
    #[error(
        "negative reward for {account} on token {token} at block {block}: balance={balance} debt={debt} accumulator={accumulator}"
    )]
    NegativeReward {
        token: Address,
        account: Address,
        block: u64,
        balance: BigUint,
        debt: BigUint,
        accumulator: BigUint,
    },
    #[error(
        "balance underflow for {account} on token {token} at block {block}: balance={balance} amount={amount}"
    )]
    BalanceUnderflow {
        token: Address,
        account: Address,
        block: u64,
        balance: BigUint,
        amount: BigUint,
    },
    #[error("total supply underflow on token {token} at block {block}: supply={supply} burn={amount}")]
    SupplyUnderflow {
        token: Address,
        block: u64,
        supply: BigUint,
        amount: BigUint,
    },
    #[error("residual supply {supply} on token {token} after end-of-window flush")]
    ResidualSupply { token: Address, supply: BigUint },
    #[error("accrued rewards {accrued} on token {token} do not match supply-weighted accrual {expected}")]
    AccrualMismatch {
        token: Address,
        accrued: BigUint,
        expected: BigUint,
    },
    #[error("token {token} accrued no distributable reward in its window")]
    NoDistributableReward { token: Address },
    #[error("batch {batch} has zero total weight")]
    ZeroTotalWeight { batch: String },
    #[error("rebuilt root {rebuilt} does not match published root {published}")]
    RootMismatch { published: B256, rebuilt: B256 },

    // ---- input / configuration ----
    #[error("invalid decimal amount {input:?}: {reason}")]
    InvalidDecimal { input: String, reason: &'static str },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("entitlement {amount} for {account} does not fit in 256 bits")]
    AmountOverflow { account: Address, amount: BigUint },
    #[error("cannot build a merkle tree from an empty entitlement table")]
    EmptyTable,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;
