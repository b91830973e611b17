//! Merkle batching of ASR records (§5.2): groups of signed records are
//! folded into a single root hash before being handed to an anchor sink, so
//! on-chain anchoring cost is amortized across a whole batch.

use serde::{Deserialize, Serialize};

use crate::crypto::primitives::sha256;

use super::record::AsrRecord;

/// One step of a Merkle inclusion proof: the sibling hash and which side it
/// sits on relative to the node being folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofStep {
    Left([u8; 32]),
    Right([u8; 32]),
}

/// A closed batch of ASR records and their Merkle root (§5.2). Last-leaf
/// duplication (Bitcoin-style) is used when a level has an odd node count.
#[derive(Debug, Clone)]
pub struct MerkleBatch {
    leaves: Vec<[u8; 32]>,
    levels: Vec<Vec<[u8; 32]>>,
    pub root: [u8; 32],
}

impl MerkleBatch {
    /// Build a batch from already-signed records, in submission order.
    /// Panics only if `records` is empty — batches are closed by
    /// `AsrPipeline` only once at least one record is present.
    pub fn build(records: &[AsrRecord]) -> Self {
        assert!(!records.is_empty(), "a Merkle batch needs at least one record");
        let leaves: Vec<[u8; 32]> = records.iter().map(AsrRecord::leaf_hash).collect();

        let mut levels = vec![leaves.clone()];
        let mut current = leaves.clone();
        while current.len() > 1 {
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            let mut i = 0;
            while i < current.len() {
                let left = current[i];
                let right = if i + 1 < current.len() {
                    current[i + 1]
                } else {
                    current[i] // last-leaf duplication
                };
                next.push(hash_pair(&left, &right));
                i += 2;
            }
            levels.push(next.clone());
            current = next;
        }

        let root = *current.first().unwrap_or(&leaves[0]);
        Self {
            leaves,
            levels,
            root,
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Produce an inclusion proof for the record at `index` in this batch's
    /// original leaf order.
    pub fn proof_for(&self, index: usize) -> Option<Vec<ProofStep>> {
        if index >= self.leaves.len() {
            return None;
        }
        let mut proof = Vec::new();
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
            let sibling = if sibling_idx < level.len() {
                level[sibling_idx]
            } else {
                level[idx] // duplicated last leaf was its own sibling
            };
            if idx % 2 == 0 {
                proof.push(ProofStep::Right(sibling));
            } else {
                proof.push(ProofStep::Left(sibling));
            }
            idx /= 2;
        }
        Some(proof)
    }
}

/// Verify that `leaf` combined with `proof` folds up to `root`, independent
/// of any particular `MerkleBatch` instance (the receiving side of an
/// anchored proof only ever has the leaf, the proof, and the claimed root).
pub fn verify_proof(leaf: [u8; 32], proof: &[ProofStep], root: [u8; 32]) -> bool {
    let mut current = leaf;
    for step in proof {
        current = match step {
            ProofStep::Left(sibling) => hash_pair(sibling, &current),
            ProofStep::Right(sibling) => hash_pair(&current, sibling),
        };
    }
    current == root
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(left);
    buf.extend_from_slice(right);
    sha256(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::record::AsrAction;
    use crate::identity::AgentId;
    use crate::metadata::MetadataValue;
    use chrono::{TimeZone, Utc};

    fn make_records(n: usize) -> Vec<AsrRecord> {
        (0..n)
            .map(|i| {
                AsrRecord::new(
                    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                    AgentId::from_bytes([i as u8; 20]),
                    AsrAction::Encrypted,
                    0,
                    "active",
                    MetadataValue::map(),
                )
            })
            .collect()
    }

    #[test]
    fn even_batch_proofs_verify() {
        let records = make_records(8);
        let batch = MerkleBatch::build(&records);
        for i in 0..records.len() {
            let proof = batch.proof_for(i).unwrap();
            assert!(verify_proof(records[i].leaf_hash(), &proof, batch.root));
        }
    }

    #[test]
    fn odd_batch_uses_last_leaf_duplication_and_still_verifies() {
        let records = make_records(7);
        let batch = MerkleBatch::build(&records);
        for i in 0..records.len() {
            let proof = batch.proof_for(i).unwrap();
            assert!(verify_proof(records[i].leaf_hash(), &proof, batch.root));
        }
    }

    #[test]
    fn tampered_leaf_breaks_proof() {
        let records = make_records(4);
        let batch = MerkleBatch::build(&records);
        let proof = batch.proof_for(0).unwrap();
        let mut bad_leaf = records[0].leaf_hash();
        bad_leaf[0] ^= 0xff;
        assert!(!verify_proof(bad_leaf, &proof, batch.root));
    }

    #[test]
    fn single_record_batch_root_is_its_own_leaf() {
        let records = make_records(1);
        let batch = MerkleBatch::build(&records);
        assert_eq!(batch.root, records[0].leaf_hash());
    }

    proptest::proptest! {
        /// For any non-empty batch size, every leaf's inclusion proof folds
        /// up to the batch root regardless of where last-leaf duplication
        /// falls.
        #[test]
        fn every_leaf_proves_inclusion_for_any_batch_size(n in 1usize..=64) {
            let records = make_records(n);
            let batch = MerkleBatch::build(&records);
            for i in 0..records.len() {
                let proof = batch.proof_for(i).unwrap();
                proptest::prop_assert!(verify_proof(records[i].leaf_hash(), &proof, batch.root));
            }
        }
    }
}
