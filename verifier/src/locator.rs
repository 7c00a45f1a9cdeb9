//! Transaction locator: finds a transaction inside a verified
//! masterchain block by walking the account-blocks dictionary and each
//! account's nested transaction dictionary.

use rand::Rng;
use std::sync::Arc;
use tonlite_common::{Hash, TxHash, VerifyError};
use tonlite_codec::{account_blocks_dict, parse_block_header, parse_dict, Cell};
use tracing::debug;

/// Bits preceding each account's transaction dictionary: transaction
/// count (4), account address (256), state-update marker (4).
const ACCOUNT_BLOCK_HEADER_BITS: usize = 4 + 256 + 4;

/// Tag of an ordinary transaction cell, checked over its first 4 bits.
const TRANSACTION_TAG: u64 = 0b0111;

/// Dictionary coordinates of one located transaction.
#[derive(Debug, Clone)]
pub struct TxLocation {
    /// Key into the account-blocks dictionary (the account address).
    pub account: Hash<32>,

    /// Key into that account's transaction dictionary.
    pub tx_key: u64,

    /// The transaction's own cell.
    pub transaction: Arc<Cell>,
}

/// Locate a transaction in a masterchain block by content hash, or pick
/// one pseudorandomly when no target is given (test flows). The block
/// must be a masterchain block; transaction proofs are not defined for
/// shard blocks here.
pub fn locate_transaction(
    root: &Arc<Cell>,
    target: Option<TxHash>,
) -> Result<TxLocation, VerifyError> {
    let header = parse_block_header(root)?;
    if header.not_master {
        return Err(VerifyError::SanityCheckFailed(format!(
            "not a masterchain block: seqno={}",
            header.seqno
        )));
    }

    let accounts = account_blocks_dict(root)?.ok_or_else(|| {
        VerifyError::NotFound(format!("block seqno={} has no transactions", header.seqno))
    })?;

    let mut candidates = Vec::new();
    for (account_key, leaf) in accounts.iter() {
        let mut cs = leaf.clone();
        cs.skip_bits(ACCOUNT_BLOCK_HEADER_BITS)?;
        let transactions = parse_dict(&mut cs, 64)?;
        for (tx_key, tx_leaf) in transactions.iter() {
            let tx_cell = tx_leaf.clone().load_ref_cell()?;
            if tx_cell.parse().preload_uint(4)? != TRANSACTION_TAG {
                continue;
            }
            if let Some(wanted) = target {
                if tx_cell.hash() == wanted {
                    debug!(account = %account_key.as_hash(), tx_key = tx_key.as_u64(), "transaction located");
                    return Ok(TxLocation {
                        account: account_key.as_hash(),
                        tx_key: tx_key.as_u64(),
                        transaction: tx_cell,
                    });
                }
            } else {
                candidates.push(TxLocation {
                    account: account_key.as_hash(),
                    tx_key: tx_key.as_u64(),
                    transaction: tx_cell,
                });
            }
        }
    }

    match target {
        Some(wanted) => Err(VerifyError::NotFound(format!(
            "transaction with hash {wanted} not found in block seqno={}",
            header.seqno
        ))),
        None if candidates.is_empty() => Err(VerifyError::NotFound(format!(
            "block seqno={} has no transaction cells",
            header.seqno
        ))),
        None => {
            let pick = rand::rng().random_range(0..candidates.len());
            Ok(candidates.swap_remove(pick))
        }
    }
}
