//! Collaborator interfaces the pipeline consumes: block and signature
//! sources (network transport lives behind them) and an optional cache.
//! Every implementation is untrusted; the pipeline re-checks everything
//! it receives.

use async_trait::async_trait;
use std::sync::Arc;
use tonlite_common::{BlockIdExt, FileHash, RootHash, SignatureBundle, VerifyError};

/// Raw block access. Implementations talk to lite servers or replay
/// recorded fixtures; failures surface as [`VerifyError::Source`].
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Fetch the serialized bag-of-cells bytes of one block.
    async fn fetch_raw_block(&self, id: &BlockIdExt) -> Result<Vec<u8>, VerifyError>;

    /// Resolve a sequence number to the block's root and file hashes.
    async fn fetch_block_hashes(
        &self,
        seqno: u32,
        workchain: i32,
        shard: u64,
    ) -> Result<(RootHash, FileHash), VerifyError>;

    /// Latest masterchain block id, seeding the key-block walk.
    async fn masterchain_head(&self) -> Result<BlockIdExt, VerifyError>;
}

/// Signature bundle access for masterchain blocks. The bundle a source
/// returns may be stale or partial; the pipeline re-requests on weak
/// quorum. An empty bundle is a permanent source failure.
#[async_trait]
pub trait SignatureSource: Send + Sync {
    async fn fetch_signatures(&self, seqno: u32) -> Result<SignatureBundle, VerifyError>;
}

// Sources held behind a shared handle keep working as sources, so a
// caller can retain its own handle for inspection after handing one to
// the pipeline.
#[async_trait]
impl<T: SignatureSource + ?Sized> SignatureSource for Arc<T> {
    async fn fetch_signatures(&self, seqno: u32) -> Result<SignatureBundle, VerifyError> {
        (**self).fetch_signatures(seqno).await
    }
}

/// Get/put cache for fetched artifacts. A miss is always tolerable and
/// never an error; writes are best-effort.
#[async_trait]
pub trait BlockCache: Send + Sync {
    async fn get_block(&self, id: &BlockIdExt) -> Option<Vec<u8>>;
    async fn put_block(&self, id: &BlockIdExt, bytes: &[u8]);
    async fn get_signatures(&self, seqno: u32) -> Option<SignatureBundle>;
    async fn put_signatures(&self, seqno: u32, bundle: &SignatureBundle);
}

/// Cache that never hits. Used by callers that want every artifact
/// re-fetched, and by tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

#[async_trait]
impl BlockCache for NoCache {
    async fn get_block(&self, _id: &BlockIdExt) -> Option<Vec<u8>> {
        None
    }

    async fn put_block(&self, _id: &BlockIdExt, _bytes: &[u8]) {}

    async fn get_signatures(&self, _seqno: u32) -> Option<SignatureBundle> {
        None
    }

    async fn put_signatures(&self, _seqno: u32, _bundle: &SignatureBundle) {}
}
