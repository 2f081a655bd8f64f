//! Merkle commitment over the entitlement table.
//!
//! Leaves are `keccak256(abi.encode(address, uint256))`; interior nodes hash
//! the smaller child first. Leaves are sorted before building, so the root
//! depends only on the set of (address, amount) pairs. An odd node is
//! promoted to the next level unchanged.

use std::collections::BTreeMap;
use std::path::Path;

use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::allocation::AllocationTable;
use crate::checkpoint::{read_json, write_json_atomic};
use crate::error::{Result, SnapshotError};
use crate::units::biguint_to_u256;

/// `keccak256(abi.encode(address, uint256))`.
pub fn leaf(account: Address, amount: U256) -> B256 {
    let mut buf = [0u8; 64];
    buf[12..32].copy_from_slice(account.as_slice());
    buf[32..].copy_from_slice(&amount.to_be_bytes::<32>());
    keccak256(buf)
}

/// `keccak256(min(a, b) ++ max(a, b))`.
pub fn hash_pair(a: &B256, b: &B256) -> B256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo.as_slice());
    buf[32..].copy_from_slice(hi.as_slice());
    keccak256(buf)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// `layers[0]` are the sorted leaves, the last layer holds the root.
    layers: Vec<Vec<B256>>,
}

impl MerkleTree {
    /// Returns `None` for an empty leaf set.
    pub fn from_leaves(mut leaves: Vec<B256>) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }
        leaves.sort();

        let mut layers = vec![leaves];
        while let Some(level) = layers.last().filter(|l| l.len() > 1) {
            let next: Vec<B256> = level
                .chunks(2)
                .map(|pair| match pair {
                    [a, b] => hash_pair(a, b),
                    [single] => *single,
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            layers.push(next);
        }
        Some(Self { layers })
    }

    pub fn root(&self) -> B256 {
        // from_leaves never builds an empty layer
        self.layers.last().and_then(|l| l.first()).copied().unwrap_or_default()
    }

    pub fn leaves(&self) -> &[B256] {
        &self.layers[0]
    }

    /// Index of `leaf` in the sorted leaf layer.
    pub fn position(&self, leaf: &B256) -> Option<usize> {
        self.leaves().binary_search(leaf).ok()
    }

    /// Sibling hashes from the leaf upwards. Levels where the node was
    /// promoted without a sibling contribute nothing.
    pub fn proof(&self, index: usize) -> Option<Vec<B256>> {
        if index >= self.leaves().len() {
            return None;
        }
        let mut proof = Vec::new();
        let mut index = index;
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = index ^ 1;
            if let Some(node) = layer.get(sibling) {
                proof.push(*node);
            }
            index /= 2;
        }
        Some(proof)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLeaf {
    pub amount: U256,
    pub leaf: B256,
}

/// The published artifact: everything a claim front-end needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleSnapshot {
    pub root: B256,
    /// Sorted leaf layer.
    pub leaves: Vec<B256>,
    pub accounts: BTreeMap<Address, AccountLeaf>,
}

impl MerkleSnapshot {
    pub fn account(&self, account: &Address) -> Option<&AccountLeaf> {
        self.accounts.get(account)
    }

    /// Rebuilds the tree from the stored leaves.
    pub fn tree(&self) -> Option<MerkleTree> {
        MerkleTree::from_leaves(self.leaves.clone())
    }
}

/// Commits the entitlement table.
pub fn build_tree(table: &AllocationTable) -> Result<MerkleSnapshot> {
    if table.is_empty() {
        return Err(SnapshotError::EmptyTable);
    }

    let mut accounts = BTreeMap::new();
    for (account, amount) in table {
        let amount = biguint_to_u256(amount).ok_or_else(|| SnapshotError::AmountOverflow {
            account: *account,
            amount: amount.clone(),
        })?;
        accounts.insert(
            *account,
            AccountLeaf {
                amount,
                leaf: leaf(*account, amount),
            },
        );
    }

    let tree = MerkleTree::from_leaves(accounts.values().map(|a| a.leaf).collect())
        .ok_or(SnapshotError::EmptyTable)?;
    let root = tree.root();
    info!("[MERKLE] {} leaves, root {}", tree.leaves().len(), root);

    Ok(MerkleSnapshot {
        root,
        leaves: tree.leaves().to_vec(),
        accounts,
    })
}

/// Fails if a root was already published and the rebuild differs.
pub fn ensure_published_root(published: Option<B256>, rebuilt: B256) -> Result<()> {
    match published {
        Some(published) if published != rebuilt => {
            warn!("[MERKLE] rebuilt root {} differs from published {}", rebuilt, published);
            Err(SnapshotError::RootMismatch { published, rebuilt })
        }
        _ => Ok(()),
    }
}

pub fn read_snapshot(path: &Path) -> Result<MerkleSnapshot> {
    read_json(path)
}

/// Writes `snapshot` atomically. An existing file with a different root is
/// never replaced.
pub fn write_snapshot(path: &Path, snapshot: &MerkleSnapshot) -> Result<()> {
    if path.exists() {
        let existing = read_snapshot(path)?;
        ensure_published_root(Some(existing.root), snapshot.root)?;
    }
    write_json_atomic(path, snapshot)?;
    info!("[MERKLE] snapshot written to {}", path.display());
    Ok(())
}
