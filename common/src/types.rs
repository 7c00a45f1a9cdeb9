//! Core type definitions for the Tonlite verifier

use crate::crypto::{node_id_short, PublicKey, Signature};
use crate::hash::{FileHash, NodeIdShort, RootHash};
use serde::{Deserialize, Serialize};

/// Masterchain workchain id.
pub const MASTERCHAIN_ID: i32 = -1;

/// The full masterchain shard (all address bits).
pub const MASTERCHAIN_SHARD: u64 = 0x8000_0000_0000_0000;

/// Extended block identifier, enough to request a block from any source
/// and to check that the source returned the block we asked for.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIdExt {
    /// Workchain id (-1 for masterchain)
    pub workchain: i32,

    /// Shard id
    pub shard: u64,

    /// Block sequence number within the shard
    pub seqno: u32,

    /// Representation hash of the block's root cell
    pub root_hash: RootHash,

    /// Hash of the block's serialized bytes
    pub file_hash: FileHash,
}

impl BlockIdExt {
    /// Identifier of a masterchain block.
    pub fn masterchain(seqno: u32, root_hash: RootHash, file_hash: FileHash) -> Self {
        Self {
            workchain: MASTERCHAIN_ID,
            shard: MASTERCHAIN_SHARD,
            seqno,
            root_hash,
            file_hash,
        }
    }
}

/// One weighted validator, as listed in a key block's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorDescr {
    /// Ed25519 public key
    pub pubkey: PublicKey,

    /// Stake-proportional voting power
    pub weight: u64,

    /// Position in the serialized validator list
    pub index: u16,
}

impl ValidatorDescr {
    /// Short node id derived from this validator's public key.
    pub fn node_id(&self) -> NodeIdShort {
        node_id_short(&self.pubkey)
    }
}

/// A weighted validator set for one epoch. Instances are immutable;
/// an epoch switch replaces the whole set rather than mutating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    /// Validators in list order
    pub list: Vec<ValidatorDescr>,

    /// Sum of all weights
    pub total_weight: u64,

    /// Unix time this set stops being authoritative
    pub utime_until: u32,
}

impl ValidatorSet {
    /// Build a set from an ordered list, summing the total weight.
    pub fn new(list: Vec<ValidatorDescr>, utime_until: u32) -> Self {
        let total_weight = list.iter().map(|v| v.weight).sum();
        Self {
            list,
            total_weight,
            utime_until,
        }
    }

    /// Find the validator whose derived short node id matches `id`.
    /// Absence is not an error: signatures from unknown signers carry no
    /// weight and are simply ignored by the caller.
    pub fn find_by_node_id(&self, id: &NodeIdShort) -> Option<&ValidatorDescr> {
        self.list.iter().find(|v| v.node_id() == *id)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

/// One entry of a signature bundle returned by an untrusted source.
/// Identifies its signer only by short node id, never by public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    /// Short node id of the claimed signer
    pub node_id_short: NodeIdShort,

    /// Ed25519 signature over the canonical block signing message
    pub signature: Signature,
}

/// Unordered signature bundle for one block, plus the block identity the
/// source claims the signatures are for.
#[derive(Debug, Clone, Default)]
pub struct SignatureBundle {
    pub signatures: Vec<SignatureRecord>,
    pub workchain: i32,
    pub shard: u64,
    pub root_hash: RootHash,
    pub file_hash: FileHash,
}

/// Which validator set a verification ended up using. Decided once per
/// verification by signer-overlap counting, then carried to the proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetInUse {
    /// The block was signed within the current epoch
    Current,

    /// Signer overlap showed the block postdates validator rotation
    Next,
}

impl SetInUse {
    /// True when the next set was selected over the current one.
    pub fn switched(&self) -> bool {
        matches!(self, SetInUse::Next)
    }
}

/// Both epoch snapshots tracked by a verifier instance. Replaced
/// wholesale (single atomic publish) when a key block is accepted.
#[derive(Debug, Clone)]
pub struct EpochValidators {
    pub current: ValidatorSet,
    pub next: ValidatorSet,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(seed: u8, weight: u64, index: u16) -> ValidatorDescr {
        ValidatorDescr {
            pubkey: PublicKey::from([seed; 32]),
            weight,
            index,
        }
    }

    #[test]
    fn total_weight_is_summed() {
        let set = ValidatorSet::new(vec![validator(1, 10, 0), validator(2, 32, 1)], 1_700_000_000);
        assert_eq!(set.total_weight, 42);
    }

    #[test]
    fn find_by_node_id_matches_derived_id() {
        let set = ValidatorSet::new(vec![validator(1, 10, 0), validator(2, 32, 1)], 0);
        let id = set.list[1].node_id();
        let found = set.find_by_node_id(&id).unwrap();
        assert_eq!(found.index, 1);

        let unknown = NodeIdShort::new([0xff; 32]);
        assert!(set.find_by_node_id(&unknown).is_none());
    }
}
