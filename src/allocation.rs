use std::collections::btree_map;
use std::collections::BTreeMap;

use alloy_primitives::Address;
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::units::{get_or_zero, hex_amount_map};

/// Address -> amount table, accumulated across tokens and batches.
///
/// Writes always add to the existing entry; nothing here overwrites an
/// amount. Ordered so that every file written from it is byte-stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationTable(#[serde(with = "hex_amount_map")] BTreeMap<Address, BigUint>);

impl AllocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit zero for accounts that were never credited.
    pub fn get_or_zero(&self, account: &Address) -> BigUint {
        get_or_zero(&self.0, account)
    }

    pub fn get(&self, account: &Address) -> Option<&BigUint> {
        self.0.get(account)
    }

    pub fn contains(&self, account: &Address) -> bool {
        self.0.contains_key(account)
    }

    /// Adds `amount` to `account`.
    pub fn credit(&mut self, account: Address, amount: &BigUint) {
        *self.0.entry(account).or_default() += amount;
    }

    /// Adds every entry of `other` into `self`.
    pub fn merge(&mut self, other: &AllocationTable) {
        for (account, amount) in other.iter() {
            self.credit(*account, amount);
        }
    }

    pub fn total(&self) -> BigUint {
        self.0.values().fold(BigUint::zero(), |acc, v| acc + v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Address, BigUint> {
        self.0.iter()
    }

    pub fn into_inner(self) -> BTreeMap<Address, BigUint> {
        self.0
    }
}

impl FromIterator<(Address, BigUint)> for AllocationTable {
    fn from_iter<I: IntoIterator<Item = (Address, BigUint)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (account, amount) in iter {
            table.credit(account, &amount);
        }
        table
    }
}

impl<'a> IntoIterator for &'a AllocationTable {
    type Item = (&'a Address, &'a BigUint);
    type IntoIter = btree_map::Iter<'a, Address, BigUint>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    #[test]
    fn test_credit_accumulates() {
        let mut table = AllocationTable::new();
        table.credit(addr(1), &BigUint::from(5u32));
        table.credit(addr(1), &BigUint::from(7u32));
        assert_eq!(table.get_or_zero(&addr(1)), BigUint::from(12u32));
        assert_eq!(table.get_or_zero(&addr(2)), BigUint::zero());
        assert!(!table.contains(&addr(2)));
    }

    #[test]
    fn test_merge_adds_not_overwrites() {
        let mut a: AllocationTable = [(addr(1), BigUint::from(10u32))].into_iter().collect();
        let b: AllocationTable = [(addr(1), BigUint::from(3u32)), (addr(2), BigUint::from(4u32))]
            .into_iter()
            .collect();
        a.merge(&b);
        assert_eq!(a.get_or_zero(&addr(1)), BigUint::from(13u32));
        assert_eq!(a.get_or_zero(&addr(2)), BigUint::from(4u32));
        assert_eq!(a.total(), BigUint::from(17u32));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_serializes_as_hex_map() {
        let table: AllocationTable = [(addr(0x11), BigUint::from(255u32))].into_iter().collect();
        let json = serde_json::to_value(&table).unwrap();
        let entry = json.as_object().unwrap().values().next().unwrap();
        assert_eq!(entry, "ff");

        let back: AllocationTable = serde_json::from_value(json).unwrap();
        assert_eq!(back, table);
    }
}
