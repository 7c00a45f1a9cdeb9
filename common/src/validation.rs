//! Verification results and error taxonomy for the Tonlite verifier

use thiserror::Error;

/// Verification error. Every variant except [`VerifyError::WeakQuorum`]
/// is terminal for the request; `WeakQuorum` drives the pipeline's
/// bounded re-fetch loop and degrades to an inconclusive outcome once
/// the attempt ceiling is reached.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VerifyError {
    /// Malformed bit-tree: the source or cache returned corrupt data.
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// A signature failed cryptographic verification for the validator
    /// it claims to match. Tampering, not staleness: never retried.
    #[error("faulty signature: seqno={seqno}, signature #{signature_index} for validator #{validator_index}")]
    FaultySignature {
        seqno: u32,
        signature_index: usize,
        validator_index: u16,
    },

    /// No returned signature matched any validator of the candidate set.
    #[error("block signers are not a subset of the validator set: seqno={seqno}")]
    SignersNotSubset { seqno: u32 },

    /// Matched signers hold positive but insufficient weight. The source
    /// likely returned a stale or partial bundle; worth re-requesting.
    #[error("weak signers: {signed_weight}/{total_weight}, seqno={seqno}")]
    WeakQuorum {
        seqno: u32,
        signed_weight: u64,
        total_weight: u64,
    },

    /// Transaction or account lookup failed. Does not imply the block
    /// itself is invalid.
    #[error("not found: {0}")]
    NotFound(String),

    /// Wrong block kind, hash mismatch or non-masterchain block:
    /// caller or source error, fails before any signature check.
    #[error("sanity check failed: {0}")]
    SanityCheckFailed(String),

    /// Collaborator (network or cache) failure.
    #[error("source error: {0}")]
    Source(String),
}

/// Malformed bit-tree data.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("read past end of cell data: wanted {wanted} bits at offset {offset} of {available}")]
    BitUnderflow {
        offset: usize,
        wanted: usize,
        available: usize,
    },

    #[error("read past cell references: wanted ref {wanted} of {available}")]
    RefUnderflow { wanted: usize, available: usize },

    #[error("dictionary label of {label_bits} bits exceeds remaining key length {remaining}")]
    LabelOverrun { label_bits: usize, remaining: usize },

    #[error("unexpected structure: {0}")]
    UnexpectedStructure(String),
}

/// Terminal outcome of one block verification. There is no partial
/// success: a block is accepted, explicitly inconclusive, or the request
/// failed with a [`VerifyError`].
#[derive(Debug, Clone)]
pub enum BlockOutcome<T> {
    /// Quorum reached, all matched signatures valid.
    Accepted(T),

    /// Weak signatures persisted through every retry; the block is most
    /// likely archival-pruned on the source side. Skippable, not fatal.
    Inconclusive { seqno: u32 },
}

impl<T> BlockOutcome<T> {
    /// Unwrap the accepted value, panicking on inconclusive. Test helper.
    pub fn expect_accepted(self, msg: &str) -> T {
        match self {
            BlockOutcome::Accepted(v) => v,
            BlockOutcome::Inconclusive { seqno } => {
                panic!("{msg}: inconclusive at seqno={seqno}")
            }
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, BlockOutcome::Accepted(_))
    }
}
