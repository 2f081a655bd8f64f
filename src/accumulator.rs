//! Accumulator engine.
//!
//! Replays one token's transfer log with the reward-per-share ("MasterChef")
//! scheme: a global accumulator grows by `blocks * SCALE / totalSupply`, and
//! every balance change settles `accumulator * balance - rewardDebt` into the
//! holder's accrued reward. One [`TokenReplay`] exists per token replay and is
//! consumed by [`TokenReplay::finish`]; nothing is shared between tokens.

use std::collections::{BTreeMap, HashSet};

use alloy_primitives::Address;
use num_bigint::BigUint;
use num_traits::{CheckedSub, Zero};
use tracing::{debug, debug_span, info, trace};

use crate::allocation::AllocationTable;
use crate::config::Timeframe;
use crate::error::{Result, SnapshotError};
use crate::events::{EventSource, TransferEvent};
use crate::units::{get_or_zero, u256_to_biguint, SCALE};

/// Everything one token replay needs besides its events.
#[derive(Debug, Clone)]
pub struct ReplayParams<'a> {
    pub token: Address,
    /// `max(created_at, floor)`; events start here.
    pub start_block: u64,
    pub window: Timeframe,
    /// Drop the first record (the initialisation mint) when replay starts
    /// at the token's creation block.
    pub skip_initial_record: bool,
    pub ignore: &'a HashSet<Address>,
    pub remove: &'a HashSet<Address>,
    /// Token weight in 10^18 fixed-point.
    pub weight: BigUint,
}

#[derive(Debug, Clone, Default)]
struct AccountState {
    balance: BigUint,
    debt: BigUint,
}

/// Mutable state of a single token replay.
#[derive(Debug)]
pub struct TokenReplay {
    token: Address,
    start_block: u64,
    window_start: u64,
    window_end: u64,
    total_supply: BigUint,
    accumulator: BigUint,
    last_block: u64,
    current_block: u64,
    last_position: Option<(u64, u64)>,
    accounts: BTreeMap<Address, AccountState>,
    rewards: BTreeMap<Address, BigUint>,
    // sum of Δaccumulator * totalSupply, re-derived independently of per-account settling
    supply_weighted_accrual: BigUint,
    /// Events accepted by `apply`, ignored ones included.
    events_replayed: u64,
}

impl TokenReplay {
    pub fn new(token: Address, start_block: u64, window: Timeframe) -> Self {
        let window_start = window.start.max(start_block);
        Self {
            token,
            start_block,
            window_start,
            window_end: window.end,
            total_supply: BigUint::zero(),
            accumulator: BigUint::zero(),
            // overwritten by the first event; only an in-window first event sees it
            last_block: window_start,
            current_block: start_block,
            last_position: None,
            accounts: BTreeMap::new(),
            rewards: BTreeMap::new(),
            supply_weighted_accrual: BigUint::zero(),
            events_replayed: 0,
        }
    }

    pub fn total_supply(&self) -> &BigUint {
        &self.total_supply
    }

    pub fn accumulator(&self) -> &BigUint {
        &self.accumulator
    }

    pub fn balance_of(&self, account: &Address) -> BigUint {
        self.accounts
            .get(account)
            .map(|s| s.balance.clone())
            .unwrap_or_default()
    }

    pub fn accrued_of(&self, account: &Address) -> BigUint {
        get_or_zero(&self.rewards, account)
    }

    pub fn events_replayed(&self) -> u64 {
        self.events_replayed
    }

    /// Applies one event. Events must arrive in strictly increasing
    /// (block, log position) order and inside `[start_block, window.end]`.
    pub fn apply(&mut self, event: &TransferEvent, ignore: &HashSet<Address>) -> Result<()> {
        let position = event.position();
        if let Some(prev) = self.last_position {
            if position <= prev {
                return Err(SnapshotError::EventOrder {
                    token: self.token,
                    block: position.0,
                    log_position: position.1,
                    prev_block: prev.0,
                    prev_log_position: prev.1,
                });
            }
        }
        self.last_position = Some(position);

        if event.block_number < self.start_block || event.block_number > self.window_end {
            return Err(SnapshotError::EventOutOfRange {
                token: self.token,
                block: event.block_number,
                from_block: self.start_block,
                to_block: self.window_end,
            });
        }
        self.events_replayed += 1;

        // Ignored wallets leave no trace at all, not even an accumulator step.
        if ignore.contains(&event.from) || ignore.contains(&event.to) {
            trace!("[REPLAY] ignoring transfer at block {}", event.block_number);
            return Ok(());
        }

        self.current_block = event.block_number;
        if event.block_number >= self.window_start {
            self.update_accumulator(event.block_number);
        }
        // Pre-window events move lastBlock too, so the first in-window update
        // accrues the span since the last pre-window event.
        self.last_block = event.block_number;

        let value = u256_to_biguint(event.value);
        if event.is_mint() {
            self.total_supply += &value;
            self.increase_balance(event.to, &value)?;
        } else if event.is_burn() {
            self.decrease_balance(event.from, &value)?;
            self.total_supply = self.total_supply.checked_sub(&value).ok_or_else(|| {
                SnapshotError::SupplyUnderflow {
                    token: self.token,
                    block: event.block_number,
                    supply: self.total_supply.clone(),
                    amount: value.clone(),
                }
            })?;
        } else {
            self.increase_balance(event.to, &value)?;
            self.decrease_balance(event.from, &value)?;
        }
        Ok(())
    }

    /// Accrues up to `window.end`, settles every holder down to zero and
    /// checks that supply and accrual both reconcile.
    pub fn finish(mut self) -> Result<AccruedRewards> {
        if self.last_block < self.window_end {
            self.update_accumulator(self.window_end);
        }
        self.current_block = self.window_end;

        let holders: Vec<(Address, BigUint)> = self
            .accounts
            .iter()
            .map(|(account, state)| (*account, state.balance.clone()))
            .collect();
        for (account, balance) in holders {
            self.set_balance(account, BigUint::zero())?;
            self.total_supply = self.total_supply.checked_sub(&balance).ok_or_else(|| {
                SnapshotError::SupplyUnderflow {
                    token: self.token,
                    block: self.window_end,
                    supply: self.total_supply.clone(),
                    amount: balance.clone(),
                }
            })?;
        }
        if !self.total_supply.is_zero() {
            return Err(SnapshotError::ResidualSupply {
                token: self.token,
                supply: self.total_supply,
            });
        }

        let total_accrued = self.rewards.values().fold(BigUint::zero(), |acc, r| acc + r);
        if total_accrued != self.supply_weighted_accrual {
            return Err(SnapshotError::AccrualMismatch {
                token: self.token,
                accrued: total_accrued,
                expected: self.supply_weighted_accrual,
            });
        }

        Ok(AccruedRewards {
            token: self.token,
            rewards: self.rewards,
            total_accrued,
            events_replayed: self.events_replayed,
        })
    }

    fn update_accumulator(&mut self, block: u64) {
        if block <= self.last_block {
            return;
        }
        if !self.total_supply.is_zero() {
            let blocks = BigUint::from(block - self.last_block);
            let delta = blocks * &*SCALE / &self.total_supply;
            self.supply_weighted_accrual += &delta * &self.total_supply;
            self.accumulator += delta;
        }
        self.last_block = block;
    }

    fn increase_balance(&mut self, account: Address, amount: &BigUint) -> Result<()> {
        let new_balance = self.balance_of(&account) + amount;
        self.set_balance(account, new_balance)
    }

    fn decrease_balance(&mut self, account: Address, amount: &BigUint) -> Result<()> {
        let balance = self.balance_of(&account);
        let new_balance = balance
            .checked_sub(amount)
            .ok_or_else(|| SnapshotError::BalanceUnderflow {
                token: self.token,
                account,
                block: self.current_block,
                balance: balance.clone(),
                amount: amount.clone(),
            })?;
        self.set_balance(account, new_balance)
    }

    fn set_balance(&mut self, account: Address, new_balance: BigUint) -> Result<()> {
        self.settle(account)?;
        if new_balance.is_zero() {
            self.accounts.remove(&account);
        } else {
            let debt = &self.accumulator * &new_balance;
            self.accounts.insert(
                account,
                AccountState {
                    balance: new_balance,
                    debt,
                },
            );
        }
        Ok(())
    }

    /// Moves pending reward into `rewards` before a balance change.
    fn settle(&mut self, account: Address) -> Result<()> {
        let Some(state) = self.accounts.get(&account) else {
            return Ok(());
        };
        if state.balance.is_zero() {
            return Ok(());
        }
        let gross = &self.accumulator * &state.balance;
        let pending = gross
            .checked_sub(&state.debt)
            .ok_or_else(|| SnapshotError::NegativeReward {
                token: self.token,
                account,
                block: self.current_block,
                balance: state.balance.clone(),
                debt: state.debt.clone(),
                accumulator: self.accumulator.clone(),
            })?;
        if !pending.is_zero() {
            *self.rewards.entry(account).or_default() += pending;
        }
        Ok(())
    }
}

/// Raw (unweighted) rewards of one finished token replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccruedRewards {
    pub token: Address,
    pub rewards: BTreeMap<Address, BigUint>,
    /// Sum over every account, removed ones included.
    pub total_accrued: BigUint,
    /// Events replayed, ignored ones included.
    pub events_replayed: u64,
}

impl AccruedRewards {
    pub fn reward_of(&self, account: &Address) -> BigUint {
        get_or_zero(&self.rewards, account)
    }

    /// Normalises rewards to `weight`: each kept account gets
    /// `reward * weight / total`, where `total` excludes `remove`.
    pub fn weighted(&self, weight: &BigUint, remove: &HashSet<Address>) -> Result<AllocationTable> {
        let distributable = self
            .rewards
            .iter()
            .filter(|(account, _)| !remove.contains(*account))
            .fold(BigUint::zero(), |acc, (_, r)| acc + r);
        if distributable.is_zero() {
            return Err(SnapshotError::NoDistributableReward { token: self.token });
        }

        let mut table = AllocationTable::new();
        for (account, reward) in &self.rewards {
            if reward.is_zero() || remove.contains(account) {
                continue;
            }
            table.credit(*account, &(reward * weight / &distributable));
        }
        Ok(table)
    }
}

/// Drains `source` through a fresh [`TokenReplay`].
pub fn replay_token(source: &mut dyn EventSource, params: &ReplayParams<'_>) -> Result<AccruedRewards> {
    let _span = debug_span!(
        "token_replay",
        token = %params.token,
        start_block = params.start_block,
        window_start = params.window.start,
        window_end = params.window.end
    )
    .entered();

    let mut replay = TokenReplay::new(params.token, params.start_block, params.window);
    let mut skip_next = params.skip_initial_record;

    while let Some(page) = source.next_page()? {
        debug!("[REPLAY] page of {} transfers", page.len());
        for event in &page {
            if skip_next {
                skip_next = false;
                trace!("[REPLAY] skipping initialisation record at block {}", event.block_number);
                continue;
            }
            replay.apply(event, params.ignore)?;
        }
    }

    if replay.events_replayed() == 0 {
        return Err(SnapshotError::NoTransfers {
            token: params.token,
            from_block: params.start_block,
            to_block: params.window.end,
        });
    }

    let accrued = replay.finish()?;
    info!(
        "[REPLAY] token {} replayed {} transfers, {} accounts accrued",
        params.token,
        accrued.events_replayed,
        accrued.rewards.len()
    );
    Ok(accrued)
}

/// Replays one token and returns its weighted contribution to the batch
/// table. The caller merges contributions; this never writes shared state.
pub fn compute_token_rewards(
    source: &mut dyn EventSource,
    params: &ReplayParams<'_>,
) -> Result<AllocationTable> {
    let accrued = replay_token(source, params)?;
    accrued.weighted(&params.weight, params.remove)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn transfer(block: u64, pos: u64, from: Address, to: Address, value: u64) -> TransferEvent {
        TransferEvent {
            block_number: block,
            log_position: pos,
            from,
            to,
            value: U256::from(value),
        }
    }

    fn scale() -> BigUint {
        SCALE.clone()
    }

    #[test]
    fn test_single_holder_accrues_full_window() {
        let mut replay = TokenReplay::new(addr(0xee), 0, Timeframe::new(0, 10));
        let none = HashSet::new();
        replay.apply(&transfer(0, 0, Address::ZERO, addr(1), 50), &none).unwrap();
        let accrued = replay.finish().unwrap();
        // 10 blocks * SCALE / 50, times balance 50
        assert_eq!(accrued.reward_of(&addr(1)), BigUint::from(10u32) * scale());
        assert_eq!(accrued.total_accrued, BigUint::from(10u32) * scale());
    }

    #[test]
    fn test_no_accrual_without_supply() {
        let mut replay = TokenReplay::new(addr(0xee), 0, Timeframe::new(0, 10));
        let none = HashSet::new();
        replay.apply(&transfer(8, 0, Address::ZERO, addr(1), 5), &none).unwrap();
        assert!(replay.accumulator().is_zero());
        let accrued = replay.finish().unwrap();
        // only blocks 8..10 had supply
        assert_eq!(accrued.reward_of(&addr(1)), BigUint::from(2u32) * scale());
    }

    #[test]
    fn test_pre_window_transfers_move_balances_not_rewards() {
        let mut replay = TokenReplay::new(addr(0xee), 1, Timeframe::new(10, 20));
        let none = HashSet::new();
        replay.apply(&transfer(1, 0, Address::ZERO, addr(1), 100), &none).unwrap();
        replay.apply(&transfer(5, 0, addr(1), addr(2), 100), &none).unwrap();
        assert!(replay.accumulator().is_zero());
        assert_eq!(replay.balance_of(&addr(2)), BigUint::from(100u32));
        let accrued = replay.finish().unwrap();
        assert_eq!(accrued.reward_of(&addr(1)), BigUint::zero());
        // the span 5..10 since the last pre-window event is accrued at the flush
        assert_eq!(accrued.reward_of(&addr(2)), BigUint::from(15u32) * scale());
    }

    #[test]
    fn test_first_in_window_update_accrues_from_last_pre_window_event() {
        let mut replay = TokenReplay::new(addr(0xee), 1, Timeframe::new(10, 20));
        let none = HashSet::new();
        replay.apply(&transfer(1, 0, Address::ZERO, addr(1), 100), &none).unwrap();
        replay.apply(&transfer(15, 0, addr(1), addr(2), 100), &none).unwrap();
        assert_eq!(replay.accumulator(), &(BigUint::from(14u32) * scale() / BigUint::from(100u32)));
        let accrued = replay.finish().unwrap();
        assert_eq!(accrued.reward_of(&addr(1)), BigUint::from(14u32) * scale());
        assert_eq!(accrued.reward_of(&addr(2)), BigUint::from(5u32) * scale());
        assert_eq!(accrued.events_replayed, 2);
    }

    #[test]
    fn test_ignored_events_are_counted() {
        let mut replay = TokenReplay::new(addr(0xee), 0, Timeframe::new(0, 10));
        let farm: HashSet<Address> = [addr(0xfa)].into_iter().collect();
        replay.apply(&transfer(1, 0, Address::ZERO, addr(1), 10), &farm).unwrap();
        replay.apply(&transfer(2, 0, addr(1), addr(0xfa), 5), &farm).unwrap();
        assert_eq!(replay.events_replayed(), 2);
        assert_eq!(replay.balance_of(&addr(1)), BigUint::from(10u32));
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut replay = TokenReplay::new(addr(0xee), 0, Timeframe::new(0, 10));
        let none = HashSet::new();
        replay.apply(&transfer(3, 1, Address::ZERO, addr(1), 5), &none).unwrap();
        let err = replay
            .apply(&transfer(3, 1, Address::ZERO, addr(1), 5), &none)
            .unwrap_err();
        assert!(matches!(err, SnapshotError::EventOrder { block: 3, log_position: 1, .. }));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut replay = TokenReplay::new(addr(0xee), 5, Timeframe::new(0, 10));
        let none = HashSet::new();
        let err = replay
            .apply(&transfer(11, 0, Address::ZERO, addr(1), 5), &none)
            .unwrap_err();
        assert!(matches!(err, SnapshotError::EventOutOfRange { block: 11, .. }));
    }

    #[test]
    fn test_overdraw_is_fatal() {
        let mut replay = TokenReplay::new(addr(0xee), 0, Timeframe::new(0, 10));
        let none = HashSet::new();
        replay.apply(&transfer(1, 0, Address::ZERO, addr(1), 5), &none).unwrap();
        let err = replay.apply(&transfer(2, 0, addr(1), addr(2), 6), &none).unwrap_err();
        match err {
            SnapshotError::BalanceUnderflow { account, block, balance, amount, .. } => {
                assert_eq!(account, addr(1));
                assert_eq!(block, 2);
                assert_eq!(balance, BigUint::from(5u32));
                assert_eq!(amount, BigUint::from(6u32));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_self_transfer_is_neutral() {
        let none = HashSet::new();
        let run = |with_self: bool| {
            let mut replay = TokenReplay::new(addr(0xee), 0, Timeframe::new(0, 10));
            replay.apply(&transfer(1, 0, Address::ZERO, addr(1), 30), &none).unwrap();
            if with_self {
                replay.apply(&transfer(4, 0, addr(1), addr(1), 30), &none).unwrap();
            }
            replay.finish().unwrap()
        };
        assert_eq!(run(true).reward_of(&addr(1)), run(false).reward_of(&addr(1)));
    }

    #[test]
    fn test_empty_source_is_fatal() {
        let none = HashSet::new();
        let params = ReplayParams {
            token: addr(0xee),
            start_block: 0,
            window: Timeframe::new(0, 10),
            skip_initial_record: true,
            ignore: &none,
            remove: &none,
            weight: BigUint::from(1u32),
        };
        // only the initialisation record: nothing left to replay
        let mut source = crate::events::VecEventSource::new(
            vec![transfer(0, 0, Address::ZERO, Address::ZERO, 1000)],
            10,
        );
        let err = replay_token(&mut source, &params).unwrap_err();
        assert!(matches!(err, SnapshotError::NoTransfers { .. }));
    }

    #[test]
    fn test_all_removed_is_fatal() {
        let mut replay = TokenReplay::new(addr(0xee), 0, Timeframe::new(0, 10));
        let none = HashSet::new();
        replay.apply(&transfer(0, 0, Address::ZERO, addr(1), 50), &none).unwrap();
        let accrued = replay.finish().unwrap();
        let remove: HashSet<Address> = [addr(1)].into_iter().collect();
        assert!(matches!(
            accrued.weighted(&BigUint::from(1u32), &remove),
            Err(SnapshotError::NoDistributableReward { .. })
        ));
    }
}
