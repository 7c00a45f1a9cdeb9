//! BFT quorum verification: match an untrusted signature bundle to a
//! validator set, verify each matched Ed25519 signature and apply the
//! two-thirds weight rule.

use std::collections::BTreeMap;
use tonlite_common::{
    EpochValidators, FileHash, RootHash, SetInUse, Signature, SignatureBundle, ValidatorSet,
    VerifyError,
};
use tracing::info;

/// TL scheme magic for `ton.blockId`, prefixed to the signed message.
/// Wire contract, do not change.
pub const BLOCK_SIGNATURE_MAGIC: [u8; 4] = [0x70, 0x6e, 0x0b, 0xc5];

/// Length of the canonical signing message: 4-byte magic, 32-byte root
/// hash, 32-byte file hash.
pub const SIGNING_MESSAGE_LEN: usize = 68;

/// The canonical message validators sign for one block.
pub fn signing_message(root_hash: &RootHash, file_hash: &FileHash) -> [u8; SIGNING_MESSAGE_LEN] {
    let mut message = [0u8; SIGNING_MESSAGE_LEN];
    message[..4].copy_from_slice(&BLOCK_SIGNATURE_MAGIC);
    message[4..36].copy_from_slice(root_hash.as_ref());
    message[36..].copy_from_slice(file_hash.as_ref());
    message
}

/// Outcome of a successful quorum check.
#[derive(Debug, Clone)]
pub struct QuorumResult {
    /// Verified signatures keyed by validator index, ascending.
    pub accepted: BTreeMap<u16, Signature>,

    /// Weight of the validators behind the accepted signatures.
    pub signed_weight: u64,

    /// Total weight of the set verified against.
    pub total_weight: u64,
}

/// Number of bundle entries whose node id matches a validator of `set`.
pub fn matching_signers(bundle: &SignatureBundle, set: &ValidatorSet) -> usize {
    bundle
        .signatures
        .iter()
        .filter(|r| set.find_by_node_id(&r.node_id_short).is_some())
        .count()
}

/// Pick the validator set to verify against. When fewer signatures
/// match the current set than the bundle holds, the block postdates
/// validator rotation and the next set is authoritative.
pub fn select_set<'a>(
    bundle: &SignatureBundle,
    validators: &'a EpochValidators,
) -> (&'a ValidatorSet, SetInUse) {
    let matched = matching_signers(bundle, &validators.current);
    if matched < bundle.signatures.len() {
        info!(
            matched,
            bundle_size = bundle.signatures.len(),
            "signer overlap below bundle size, switching to next validator set"
        );
        (&validators.next, SetInUse::Next)
    } else {
        (&validators.current, SetInUse::Current)
    }
}

/// Verify a signature bundle against one validator set.
///
/// Signatures are processed in source order; the first validator whose
/// derived node id matches wins. Unmatched entries are ignored. A
/// matched entry that fails cryptographic verification is tampering and
/// fails hard. Acceptance requires `signed_weight * 3 > total_weight * 2`.
pub fn verify_quorum(
    bundle: &SignatureBundle,
    set: &ValidatorSet,
    message: &[u8],
    seqno: u32,
) -> Result<QuorumResult, VerifyError> {
    let mut accepted = BTreeMap::new();
    let mut signed_weight = 0u64;

    for (i, record) in bundle.signatures.iter().enumerate() {
        let Some(validator) = set.find_by_node_id(&record.node_id_short) else {
            continue;
        };
        if !validator.pubkey.verify(message, &record.signature) {
            return Err(VerifyError::FaultySignature {
                seqno,
                signature_index: i,
                validator_index: validator.index,
            });
        }
        // A duplicate node id in the bundle must not count twice
        if accepted.insert(validator.index, record.signature).is_none() {
            signed_weight += validator.weight;
        }
    }

    if (signed_weight as u128) * 3 > (set.total_weight as u128) * 2 {
        Ok(QuorumResult {
            accepted,
            signed_weight,
            total_weight: set.total_weight,
        })
    } else if signed_weight == 0 {
        Err(VerifyError::SignersNotSubset { seqno })
    } else {
        Err(VerifyError::WeakQuorum {
            seqno,
            signed_weight,
            total_weight: set.total_weight,
        })
    }
}
