//! Proof service.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SnapshotError};
use crate::merkle::{hash_pair, MerkleSnapshot, MerkleTree};

/// Everything a claimant submits on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimProof {
    pub account: Address,
    pub amount: U256,
    pub leaf: B256,
    pub proof: Vec<B256>,
}

/// Folds `proof` onto `leaf` with the pair-sorted hash and compares to `root`.
pub fn verify(proof: &[B256], root: B256, leaf: B256) -> bool {
    proof.iter().fold(leaf, |node, sibling| hash_pair(&node, sibling)) == root
}

/// Proof for `account`, or `None` if it has no entitlement.
///
/// Rebuilds the tree on every call; use [`ProofService`] for repeated queries.
pub fn create_proof(snapshot: &MerkleSnapshot, account: &Address) -> Result<Option<Vec<B256>>> {
    let service = ProofService::new(snapshot.clone())?;
    Ok(service.proof(account).map(|claim| claim.proof))
}

/// A snapshot with its tree rebuilt once and kept in memory.
#[derive(Debug, Clone)]
pub struct ProofService {
    snapshot: MerkleSnapshot,
    tree: MerkleTree,
}

impl ProofService {
    /// Fails if the stored leaves do not reproduce the stored root.
    pub fn new(snapshot: MerkleSnapshot) -> Result<Self> {
        let tree = snapshot.tree().ok_or(SnapshotError::EmptyTable)?;
        if tree.root() != snapshot.root {
            return Err(SnapshotError::RootMismatch {
                published: snapshot.root,
                rebuilt: tree.root(),
            });
        }
        Ok(Self { snapshot, tree })
    }

    pub fn root(&self) -> B256 {
        self.snapshot.root
    }

    pub fn snapshot(&self) -> &MerkleSnapshot {
        &self.snapshot
    }

    pub fn proof(&self, account: &Address) -> Option<ClaimProof> {
        let Some(entry) = self.snapshot.account(account) else {
            debug!("[PROOF] {} not in snapshot", account);
            return None;
        };
        let index = self.tree.position(&entry.leaf)?;
        let proof = self.tree.proof(index)?;
        Some(ClaimProof {
            account: *account,
            amount: entry.amount,
            leaf: entry.leaf,
            proof,
        })
    }

    pub fn verify_claim(&self, claim: &ClaimProof) -> bool {
        crate::merkle::leaf(claim.account, claim.amount) == claim.leaf
            && verify(&claim.proof, self.root(), claim.leaf)
    }
}
