//! Wire messages for the on-chain light-client and transaction-checker
//! contracts. Every opcode and field width here is a bit-for-bit
//! contract with the deployed code; all of them are named constants.

use crate::locator::TxLocation;
use crate::pipeline::{ContractSetupInfo, KeyBlockProof, VerifiedBlock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tonlite_common::{PublicKey, Signature, ValidatorSet};
use tonlite_codec::{store_dict, BuildError, Cell, CellBuilder};

/// Prove a transaction is part of a verified masterchain block.
pub const OP_CHECK_TRANSACTION: u32 = 0x91d555f7;

/// Install the validator set announced by a verified key block.
pub const OP_NEW_KEY_BLOCK: u32 = 0x11a78ffe;

/// Verify an arbitrary masterchain block against the stored epoch.
pub const OP_CHECK_BLOCK: u32 = 0x8eaa9d76;

/// Key width of the signatures dictionary (validator index).
pub const SIGNATURE_DICT_KEY_BITS: usize = 16;

/// Serialized validator descriptor: 5 reserved bytes, 32-byte public
/// key, 8-byte weight.
pub const VALIDATOR_DESCR_BYTES: usize = 1 + 4 + 32 + 8;

/// Validators packed per cell in the chained validators encoding.
const VALIDATORS_PER_CELL: usize = 3;

fn store_signatures(
    b: &mut CellBuilder,
    signatures: &BTreeMap<u16, Signature>,
) -> Result<(), BuildError> {
    let entries: Vec<(u64, Signature)> =
        signatures.iter().map(|(k, v)| (*k as u64, *v)).collect();
    store_dict(b, &entries, SIGNATURE_DICT_KEY_BITS, &|b, sig: &Signature| {
        b.store_bytes(sig.as_ref())?;
        Ok(())
    })
}

/// `new_key_block` message: op, query id, block by reference, verified
/// signatures, file hash, a zero bit in the switch-flag position.
pub fn new_key_block_message(
    query_id: u64,
    proof: &KeyBlockProof,
) -> Result<Arc<Cell>, BuildError> {
    let mut b = CellBuilder::new();
    b.store_uint(OP_NEW_KEY_BLOCK as u64, 32)?;
    b.store_uint(query_id, 64)?;
    b.store_ref(Arc::clone(&proof.block.root))?;
    store_signatures(&mut b, &proof.block.signatures)?;
    b.store_bytes(proof.block.file_hash.as_ref())?;
    b.store_bit(false)?;
    b.build()
}

/// `check_block` message: op, query id, block by reference, verified
/// signatures, file hash, validator-switch flag.
pub fn check_block_message(
    query_id: u64,
    block: &VerifiedBlock,
) -> Result<Arc<Cell>, BuildError> {
    let mut b = CellBuilder::new();
    b.store_uint(OP_CHECK_BLOCK as u64, 32)?;
    b.store_uint(query_id, 64)?;
    b.store_ref(Arc::clone(&block.root))?;
    store_signatures(&mut b, &block.signatures)?;
    b.store_bytes(block.file_hash.as_ref())?;
    b.store_bit(block.validator_switch_occurred)?;
    b.build()
}

/// `check_transaction` message: op (no query id), block by reference,
/// verified signatures, file hash, account key, transaction key, the
/// transaction cell by reference, validator-switch flag.
pub fn check_transaction_message(
    block: &VerifiedBlock,
    location: &TxLocation,
) -> Result<Arc<Cell>, BuildError> {
    let mut b = CellBuilder::new();
    b.store_uint(OP_CHECK_TRANSACTION as u64, 32)?;
    b.store_ref(Arc::clone(&block.root))?;
    store_signatures(&mut b, &block.signatures)?;
    b.store_bytes(block.file_hash.as_ref())?;
    b.store_bytes(location.account.as_ref())?;
    b.store_uint(location.tx_key, 64)?;
    b.store_ref(Arc::clone(&location.transaction))?;
    b.store_bit(block.validator_switch_occurred)?;
    b.build()
}

fn store_validator_set(b: &mut CellBuilder, set: &ValidatorSet) -> Result<(), BuildError> {
    b.store_uint(set.utime_until as u64, 32)?;
    b.store_uint(set.total_weight, 64)?;
    let entries: Vec<(u64, (PublicKey, u64))> = set
        .list
        .iter()
        .map(|v| (v.index as u64, (v.pubkey, v.weight)))
        .collect();
    store_dict(b, &entries, SIGNATURE_DICT_KEY_BITS, &|b, (pubkey, weight)| {
        // 45-byte descriptor: 5 reserved bytes, pubkey, weight
        b.store_bytes(&[0u8; 5])?;
        b.store_bytes(pubkey.as_ref())?;
        b.store_uint(*weight, 64)?;
        Ok(())
    })
}

/// Bootstrap payload initializing a fresh on-chain verifier: both epoch
/// snapshots (validity window, total weight, validator dictionary) and
/// the originating seqno.
pub fn setup_info_payload(info: &ContractSetupInfo) -> Result<Arc<Cell>, BuildError> {
    let mut b = CellBuilder::new();
    store_validator_set(&mut b, &info.current)?;
    store_validator_set(&mut b, &info.next)?;
    b.store_uint(info.seqno as u64, 32)?;
    b.build()
}

/// Chain of cells holding one (gap, signature) record each, in
/// ascending validator-index order. Gap is the distance from the
/// previous signer's index.
pub fn signatures_snake_cell(records: &[(u8, Signature)]) -> Result<Arc<Cell>, BuildError> {
    let mut tail: Option<Arc<Cell>> = None;
    for (gap, signature) in records.iter().rev() {
        let mut b = CellBuilder::new();
        b.store_uint(*gap as u64, 8)?;
        b.store_bytes(signature.as_ref())?;
        if let Some(next) = tail.take() {
            b.store_ref(next)?;
        }
        tail = Some(b.build()?);
    }
    Ok(tail.unwrap_or_else(Cell::empty))
}

/// Chain of cells packing (pubkey, weight) pairs three per cell, in
/// list order.
pub fn validators_snake_cell(validators: &[(PublicKey, u64)]) -> Result<Arc<Cell>, BuildError> {
    let mut tail: Option<Arc<Cell>> = None;
    for chunk in validators.chunks(VALIDATORS_PER_CELL).rev() {
        let mut b = CellBuilder::new();
        for (pubkey, weight) in chunk {
            b.store_bytes(pubkey.as_ref())?;
            b.store_uint(*weight, 64)?;
        }
        if let Some(next) = tail.take() {
            b.store_ref(next)?;
        }
        tail = Some(b.build()?);
    }
    Ok(tail.unwrap_or_else(Cell::empty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonlite_codec::parse_dict;
    use tonlite_common::{FileHash, ValidatorDescr};

    fn sig(seed: u8) -> Signature {
        Signature::from([seed; 64])
    }

    fn sample_block(switch: bool) -> VerifiedBlock {
        let mut root = CellBuilder::new();
        root.store_uint(0x11ef55aa, 32).unwrap();
        VerifiedBlock {
            seqno: 77,
            root: root.build().unwrap(),
            file_hash: FileHash::new([0xfe; 32]),
            signatures: BTreeMap::from([(0, sig(1)), (3, sig(2))]),
            validator_switch_occurred: switch,
        }
    }

    #[test]
    fn check_block_message_layout() {
        let block = sample_block(true);
        let cell = check_block_message(42, &block).unwrap();

        let mut s = cell.parse();
        assert_eq!(s.load_uint(32).unwrap(), OP_CHECK_BLOCK as u64);
        assert_eq!(s.load_uint(64).unwrap(), 42);
        assert_eq!(s.load_ref_cell().unwrap().hash(), block.root.hash());

        assert!(s.load_bit().unwrap());
        let dict = parse_dict(&mut s.load_ref().unwrap(), 16).unwrap();
        assert_eq!(dict.len(), 2);
        let mut leaf = dict.get_u64(3).unwrap().clone();
        assert_eq!(leaf.load_bits(64 * 8).unwrap(), vec![2u8; 64]);

        assert_eq!(s.load_hash().unwrap(), block.file_hash);
        assert!(s.load_bit().unwrap()); // switch flag
        assert_eq!(s.remaining_bits(), 0);
    }

    #[test]
    fn new_key_block_switch_position_is_zero() {
        let block = sample_block(true);
        let proof = KeyBlockProof {
            signer_gaps: signer_gapless(&block),
            validators: ValidatorSet::new(vec![], 0),
            block,
        };
        let cell = new_key_block_message(7, &proof).unwrap();
        let mut s = cell.parse();
        s.skip_bits(32 + 64).unwrap();
        let _block = s.load_ref_cell().unwrap();
        s.skip_bits(1).unwrap(); // dict maybe bit
        let _dict = s.load_ref_cell().unwrap();
        s.skip_bits(256).unwrap();
        assert!(!s.load_bit().unwrap());
    }

    fn signer_gapless(block: &VerifiedBlock) -> Vec<(u8, Signature)> {
        crate::pipeline::signer_gaps(&block.signatures).unwrap()
    }

    #[test]
    fn check_transaction_message_layout() {
        let block = sample_block(false);
        let tx = CellBuilder::new().build().unwrap();
        let location = TxLocation {
            account: tonlite_common::Hash::new([0xac; 32]),
            tx_key: 0x0102_0304,
            transaction: Arc::clone(&tx),
        };
        let cell = check_transaction_message(&block, &location).unwrap();

        let mut s = cell.parse();
        assert_eq!(s.load_uint(32).unwrap(), OP_CHECK_TRANSACTION as u64);
        let _block_ref = s.load_ref_cell().unwrap();
        s.skip_bits(1).unwrap();
        let _dict = s.load_ref_cell().unwrap();
        assert_eq!(s.load_hash().unwrap(), block.file_hash);
        assert_eq!(s.load_hash().unwrap(), location.account);
        assert_eq!(s.load_uint(64).unwrap(), location.tx_key);
        assert_eq!(s.load_ref_cell().unwrap().hash(), tx.hash());
        assert!(!s.load_bit().unwrap());
    }

    #[test]
    fn setup_payload_round_trips_both_sets() {
        fn descr(seed: u8, weight: u64, index: u16) -> ValidatorDescr {
            ValidatorDescr {
                pubkey: PublicKey::from([seed; 32]),
                weight,
                index,
            }
        }
        let current = ValidatorSet::new(vec![descr(1, 10, 0), descr(2, 20, 1)], 1000);
        let next = ValidatorSet::new(vec![descr(3, 30, 0)], 2000);
        let block = sample_block(false);
        let info = ContractSetupInfo {
            block,
            current: current.clone(),
            next,
            seqno: 555,
        };

        let cell = setup_info_payload(&info).unwrap();
        let mut s = cell.parse();

        assert_eq!(s.load_uint(32).unwrap(), 1000);
        assert_eq!(s.load_uint(64).unwrap(), 30);
        assert!(s.load_bit().unwrap());
        let dict = parse_dict(&mut s.load_ref().unwrap(), 16).unwrap();
        assert_eq!(dict.len(), 2);
        let mut leaf = dict.get_u64(1).unwrap().clone();
        assert_eq!(leaf.remaining_bits(), VALIDATOR_DESCR_BYTES * 8);
        leaf.skip_bits(5 * 8).unwrap();
        assert_eq!(leaf.load_hash().unwrap().as_ref(), &[2u8; 32][..]);
        assert_eq!(leaf.load_uint(64).unwrap(), 20);

        assert_eq!(s.load_uint(32).unwrap(), 2000);
        assert_eq!(s.load_uint(64).unwrap(), 30);
        assert!(s.load_bit().unwrap());
        let _next_dict = s.load_ref_cell().unwrap();
        assert_eq!(s.load_uint(32).unwrap(), 555);
        assert_eq!(s.remaining_bits(), 0);
    }

    #[test]
    fn signature_snake_holds_one_record_per_cell() {
        let records = vec![(0u8, sig(1)), (2, sig(2)), (5, sig(3))];
        let mut cell = signatures_snake_cell(&records).unwrap();
        for (gap, signature) in &records {
            let mut s = cell.parse();
            assert_eq!(s.load_uint(8).unwrap(), *gap as u64);
            assert_eq!(s.load_bits(64 * 8).unwrap(), signature.as_ref().to_vec());
            if s.remaining_refs() > 0 {
                cell = s.load_ref_cell().unwrap();
            }
        }
    }

    #[test]
    fn validator_snake_packs_three_per_cell() {
        let validators: Vec<(PublicKey, u64)> =
            (0..7).map(|i| (PublicKey::from([i; 32]), i as u64)).collect();
        let cell = validators_snake_cell(&validators).unwrap();

        assert_eq!(cell.bit_len(), 3 * (256 + 64));
        let mid = &cell.refs()[0];
        assert_eq!(mid.bit_len(), 3 * (256 + 64));
        let last = &mid.refs()[0];
        assert_eq!(last.bit_len(), 256 + 64);
        assert!(last.refs().is_empty());

        let mut s = last.parse();
        assert_eq!(s.load_hash().unwrap().as_ref(), &[6u8; 32][..]);
        assert_eq!(s.load_uint(64).unwrap(), 6);
    }
}
