//! Epoch-aware fetch pipeline: pulls blocks and signature bundles from
//! the collaborator traits, verifies quorum with validator-rotation
//! detection and a bounded weak-quorum retry loop, and produces the
//! artifacts the on-chain contract consumes.

use crate::configuration::LiteClientConfig;
use crate::quorum::{self, signing_message};
use crate::source::{BlockCache, BlockSource, SignatureSource};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tonlite_common::{
    BlockIdExt, BlockOutcome, DecodeError, EpochValidators, FileHash, Signature, SignatureBundle,
    ValidatorSet, VerifyError,
};
use tonlite_codec::{
    extract_validator_sets, parse_block_header, Cell, CONFIG_NEXT_VALIDATORS,
};
use tracing::{debug, info, warn};

/// A block whose signatures reached quorum. Immutable terminal artifact
/// of one verification.
#[derive(Debug, Clone)]
pub struct VerifiedBlock {
    pub seqno: u32,
    pub root: Arc<Cell>,
    pub file_hash: FileHash,

    /// Verified signatures keyed by validator index.
    pub signatures: BTreeMap<u16, Signature>,

    /// True when the next validator set had to be used because the
    /// block postdates rotation.
    pub validator_switch_occurred: bool,
}

/// A verified key block plus the compact encodings derived from it.
#[derive(Debug, Clone)]
pub struct KeyBlockProof {
    pub block: VerifiedBlock,

    /// Signers by ascending validator index, each with the gap since
    /// the previous signer's index. Compact on-chain representation.
    pub signer_gaps: Vec<(u8, Signature)>,

    /// The current validator set extracted from the key block's config.
    pub validators: ValidatorSet,
}

/// Bootstrap data for initializing a fresh on-chain verifier: both
/// epoch snapshots from one verified key block.
#[derive(Debug, Clone)]
pub struct ContractSetupInfo {
    pub block: VerifiedBlock,
    pub current: ValidatorSet,
    pub next: ValidatorSet,
    pub seqno: u32,
}

/// Collapse a verified signature map into (gap, signature) records, one
/// per signer, ordered by ascending validator index. The proof encoding
/// gives each gap a single byte; a sparser signer layout cannot be
/// represented and is rejected.
pub fn signer_gaps(
    accepted: &BTreeMap<u16, Signature>,
) -> Result<Vec<(u8, Signature)>, VerifyError> {
    let mut next_index = 0u16;
    let mut records = Vec::with_capacity(accepted.len());
    for (index, signature) in accepted {
        let gap = index - next_index;
        if gap > u8::MAX as u16 {
            return Err(VerifyError::SanityCheckFailed(format!(
                "signer gap {gap} before validator #{index} does not fit one byte"
            )));
        }
        next_index = index + 1;
        records.push((gap as u8, *signature));
    }
    Ok(records)
}

/// The light-client pipeline over abstract collaborators.
pub struct LiteClient<S, G, C> {
    source: S,
    signatures: G,
    cache: C,
    config: LiteClientConfig,
}

impl<S, G, C> LiteClient<S, G, C>
where
    S: BlockSource,
    G: SignatureSource,
    C: BlockCache,
{
    pub fn new(source: S, signatures: G, cache: C, config: LiteClientConfig) -> Self {
        Self {
            source,
            signatures,
            cache,
            config,
        }
    }

    /// Fetch and quorum-verify one masterchain block against the given
    /// epoch snapshot, with rotation detection. The block itself is
    /// fetched once; on weak quorum only the signature bundle is
    /// re-requested, up to the configured attempt ceiling, after which
    /// the outcome is `Inconclusive` (stale archival source, skippable).
    pub async fn fetch_block(
        &self,
        seqno: u32,
        validators: &EpochValidators,
    ) -> Result<BlockOutcome<VerifiedBlock>, VerifyError> {
        let id = self.block_id(seqno).await?;
        let root = self.load_block(&id).await?;
        let message = signing_message(&id.root_hash, &id.file_hash);

        let mut attempt = 0;
        loop {
            let bundle = self.load_signatures(seqno, attempt > 0).await?;
            let (set, in_use) = quorum::select_set(&bundle, validators);
            match quorum::verify_quorum(&bundle, set, &message, seqno) {
                Ok(result) => {
                    info!(
                        seqno,
                        signed_weight = result.signed_weight,
                        total_weight = result.total_weight,
                        switched = in_use.switched(),
                        "block accepted"
                    );
                    return Ok(BlockOutcome::Accepted(VerifiedBlock {
                        seqno,
                        root: Arc::clone(&root),
                        file_hash: id.file_hash,
                        signatures: result.accepted,
                        validator_switch_occurred: in_use.switched(),
                    }));
                }
                Err(VerifyError::WeakQuorum {
                    signed_weight,
                    total_weight,
                    ..
                }) => {
                    if attempt >= self.config.max_retries {
                        warn!(seqno, "weak signers persisted through every retry");
                        return Ok(BlockOutcome::Inconclusive { seqno });
                    }
                    warn!(
                        seqno,
                        signed_weight, total_weight, attempt, "weak signers, re-requesting signatures"
                    );
                    attempt += 1;
                    sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch and verify a key block that announces the next epoch's
    /// validators, returning the proof artifacts for on-chain storage.
    ///
    /// Sanity checks run before any signature work: the block must be
    /// flagged as a key block, its config must carry the next validator
    /// set, and the recomputed root hash must equal the requested one
    /// (a source substituting a different block at the same seqno).
    pub async fn fetch_key_block_with_next_validators(
        &self,
        seqno: u32,
    ) -> Result<BlockOutcome<KeyBlockProof>, VerifyError> {
        let (id, root, current) = self.load_checked_key_block(seqno).await?;
        let message = signing_message(&id.root_hash, &id.file_hash);

        let mut attempt = 0;
        loop {
            let bundle = self.load_signatures(seqno, attempt > 0).await?;
            match quorum::verify_quorum(&bundle, &current, &message, seqno) {
                Ok(result) => {
                    info!(
                        seqno,
                        signers = result.accepted.len(),
                        "key block accepted"
                    );
                    return Ok(BlockOutcome::Accepted(KeyBlockProof {
                        signer_gaps: signer_gaps(&result.accepted)?,
                        block: VerifiedBlock {
                            seqno,
                            root: Arc::clone(&root),
                            file_hash: id.file_hash,
                            signatures: result.accepted,
                            validator_switch_occurred: false,
                        },
                        validators: current.clone(),
                    }));
                }
                Err(VerifyError::WeakQuorum { .. }) if attempt < self.config.max_retries => {
                    attempt += 1;
                    sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(VerifyError::WeakQuorum { .. }) => {
                    return Ok(BlockOutcome::Inconclusive { seqno });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One-shot bootstrap: extract both epoch snapshots, with validity
    /// windows and total weights, from a single verified key block.
    pub async fn fetch_contract_setup_info(
        &self,
        seqno: u32,
    ) -> Result<BlockOutcome<ContractSetupInfo>, VerifyError> {
        let (id, root, current) = self.load_checked_key_block(seqno).await?;
        // Presence was sanity-checked above
        let (_, next) = extract_validator_sets(&root)?;
        let next = next.ok_or_else(|| {
            VerifyError::SanityCheckFailed(format!(
                "key block seqno={seqno} lost its next validator set"
            ))
        })?;
        let message = signing_message(&id.root_hash, &id.file_hash);

        let mut attempt = 0;
        loop {
            let bundle = self.load_signatures(seqno, attempt > 0).await?;
            match quorum::verify_quorum(&bundle, &current, &message, seqno) {
                Ok(result) => {
                    info!(seqno, signers = result.accepted.len(), "setup info verified");
                    return Ok(BlockOutcome::Accepted(ContractSetupInfo {
                        block: VerifiedBlock {
                            seqno,
                            root: Arc::clone(&root),
                            file_hash: id.file_hash,
                            signatures: result.accepted,
                            validator_switch_occurred: false,
                        },
                        current: current.clone(),
                        next: next.clone(),
                        seqno,
                    }));
                }
                Err(VerifyError::WeakQuorum { .. }) if attempt < self.config.max_retries => {
                    attempt += 1;
                    sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(VerifyError::WeakQuorum { .. }) => {
                    return Ok(BlockOutcome::Inconclusive { seqno });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Walk the `prev_key_block_seqno` chain from the masterchain head,
    /// collecting the most recent `quantity` key blocks that announce a
    /// next validator set. Ascending seqno order. The walk stops at the
    /// chain origin even if fewer blocks were found.
    pub async fn find_recent_key_blocks(
        &self,
        quantity: usize,
    ) -> Result<Vec<u32>, VerifyError> {
        info!(quantity, "walking key-block chain from the masterchain head");
        let head = self.source.masterchain_head().await?;
        let head_root = self.load_block(&head).await?;
        let mut next_seqno = parse_block_header(&head_root)?.prev_key_block_seqno;

        let mut found = Vec::new();
        while found.len() < quantity && next_seqno != 0 {
            sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            let id = self.block_id(next_seqno).await?;
            let root = self.load_block(&id).await?;
            let header = parse_block_header(&root)?;

            let announces_next = tonlite_codec::config_dict(&root)
                .map(|cfg| cfg.get_u64(CONFIG_NEXT_VALIDATORS).is_some())
                .unwrap_or(false);
            if announces_next {
                found.push(header.seqno);
            } else {
                debug!(seqno = header.seqno, "key block without next validators, skipped");
            }
            next_seqno = header.prev_key_block_seqno;
        }

        found.reverse();
        Ok(found)
    }

    async fn block_id(&self, seqno: u32) -> Result<BlockIdExt, VerifyError> {
        let (root_hash, file_hash) = self
            .source
            .fetch_block_hashes(seqno, self.config.workchain, self.config.shard)
            .await?;
        Ok(BlockIdExt {
            workchain: self.config.workchain,
            shard: self.config.shard,
            seqno,
            root_hash,
            file_hash,
        })
    }

    async fn load_block(&self, id: &BlockIdExt) -> Result<Arc<Cell>, VerifyError> {
        if let Some(bytes) = self.cache.get_block(id).await {
            debug!(seqno = id.seqno, "block served from cache");
            return decode_block(&bytes);
        }
        let bytes = self.source.fetch_raw_block(id).await?;
        let root = decode_block(&bytes)?;
        self.cache.put_block(id, &bytes).await;
        Ok(root)
    }

    /// Fetch a signature bundle, optionally bypassing the cache. Weak
    /// retries always bypass: the point of re-requesting is fresh data.
    async fn load_signatures(
        &self,
        seqno: u32,
        bypass_cache: bool,
    ) -> Result<SignatureBundle, VerifyError> {
        if !bypass_cache {
            if let Some(bundle) = self.cache.get_signatures(seqno).await {
                debug!(seqno, "signatures served from cache");
                return Ok(bundle);
            }
        }
        let bundle = self.signatures.fetch_signatures(seqno).await?;
        if bundle.signatures.is_empty() {
            return Err(VerifyError::Source(format!(
                "no signatures found for block seqno={seqno}"
            )));
        }
        if !bypass_cache {
            self.cache.put_signatures(seqno, &bundle).await;
        }
        Ok(bundle)
    }

    /// Fetch a key block and run the sanity checks shared by the
    /// key-block operations. No signature work happens here.
    async fn load_checked_key_block(
        &self,
        seqno: u32,
    ) -> Result<(BlockIdExt, Arc<Cell>, ValidatorSet), VerifyError> {
        let id = self.block_id(seqno).await?;
        let root = self.load_block(&id).await?;

        let header = parse_block_header(&root)?;
        if !header.key_block {
            return Err(VerifyError::SanityCheckFailed(format!(
                "block seqno={seqno} is not a key block"
            )));
        }
        let (current, next) = extract_validator_sets(&root)?;
        if next.is_none() {
            return Err(VerifyError::SanityCheckFailed(format!(
                "key block seqno={seqno} does not announce next validators"
            )));
        }
        if root.hash() != id.root_hash {
            return Err(VerifyError::SanityCheckFailed(format!(
                "root hash mismatch for seqno={seqno}: {} != {}",
                root.hash(),
                id.root_hash
            )));
        }
        Ok((id, root, current))
    }
}

fn decode_block(bytes: &[u8]) -> Result<Arc<Cell>, VerifyError> {
    tonlite_codec::decode(bytes)
        .map_err(|e| DecodeError::UnexpectedStructure(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signer_gaps_encode_index_deltas() {
        let sig = Signature::from([0u8; 64]);
        let accepted: BTreeMap<u16, Signature> =
            [(0, sig), (1, sig), (4, sig), (5, sig), (9, sig)].into();
        let gaps: Vec<u8> = signer_gaps(&accepted).unwrap().iter().map(|(g, _)| *g).collect();
        assert_eq!(gaps, vec![0, 0, 2, 0, 3]);
    }

    #[test]
    fn signer_gaps_empty_map() {
        assert!(signer_gaps(&BTreeMap::new()).unwrap().is_empty());
    }

    #[test]
    fn signer_gaps_reject_gap_wider_than_one_byte() {
        let sig = Signature::from([0u8; 64]);

        // 255 is the widest representable gap
        let at_limit: BTreeMap<u16, Signature> = [(255, sig)].into();
        assert_eq!(signer_gaps(&at_limit).unwrap(), vec![(255, sig)]);

        let too_sparse: BTreeMap<u16, Signature> = [(300, sig)].into();
        let err = signer_gaps(&too_sparse).unwrap_err();
        assert!(matches!(err, VerifyError::SanityCheckFailed(_)));
    }
}
