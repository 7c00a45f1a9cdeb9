//! Block structure decoding.
//!
//! Only the parts of a block the verification pipeline consumes are
//! decoded: the info header, the account-blocks dictionary inside the
//! extra section, and for masterchain key blocks the validator-set
//! config parameters. Everything else is walked past by reference
//! position and bit count without interpretation.

use crate::cell::{Cell, Slice};
use crate::dict::{parse_dict, Dictionary};
use std::sync::Arc;
use tonlite_common::{DecodeError, PublicKey, ValidatorDescr, ValidatorSet};

const BLOCK_TAG: u32 = 0x11ef55aa;
const BLOCK_INFO_TAG: u32 = 0x9bc7a987;
const BLOCK_EXTRA_TAG: u32 = 0x4a33f6fd;
const MC_EXTRA_TAG: u16 = 0xcca5;

/// Config parameter holding the current validator set.
pub const CONFIG_CURRENT_VALIDATORS: u64 = 34;
/// Config parameter holding the next validator set, present near the
/// end of an election cycle.
pub const CONFIG_NEXT_VALIDATORS: u64 = 36;

const VALIDATORS_TAG: u64 = 0x11;
const VALIDATORS_EXT_TAG: u64 = 0x12;
const VALIDATOR_TAG: u64 = 0x53;
const VALIDATOR_ADDR_TAG: u64 = 0x73;
const SIG_PUBKEY_TAG: u64 = 0x8e81278a;

/// The block info fields the pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub global_id: i32,
    pub seqno: u32,
    pub not_master: bool,
    pub key_block: bool,
    pub gen_utime: u32,
    pub prev_key_block_seqno: u32,
}

/// Parse the info header of a block root cell.
pub fn parse_block_header(root: &Arc<Cell>) -> Result<BlockHeader, DecodeError> {
    let mut cs = root.parse();
    expect_tag(cs.load_uint(32)?, BLOCK_TAG as u64, "block")?;
    let global_id = cs.load_uint(32)? as i32;

    let mut info = cs.load_ref()?;
    expect_tag(info.load_uint(32)?, BLOCK_INFO_TAG as u64, "block info")?;
    info.skip_bits(32)?; // version
    let not_master = info.load_bit()?;
    info.skip_bits(5)?; // merge and split flags
    let key_block = info.load_bit()?;
    info.skip_bits(1)?; // vert_seqno_incr
    info.skip_bits(8)?; // flags
    let seqno = info.load_uint(32)? as u32;
    info.skip_bits(32)?; // vert_seq_no
    info.skip_bits(2 + 6 + 32 + 64)?; // shard ident
    let gen_utime = info.load_uint(32)? as u32;
    info.skip_bits(64 + 64)?; // start_lt, end_lt
    info.skip_bits(32 + 32 + 32)?; // validator_list_hash_short, catchain_seqno, min_ref_mc_seqno
    let prev_key_block_seqno = info.load_uint(32)? as u32;

    Ok(BlockHeader {
        global_id,
        seqno,
        not_master,
        key_block,
        gen_utime,
        prev_key_block_seqno,
    })
}

/// Descend from the block root to the extra section.
fn block_extra(root: &Arc<Cell>) -> Result<Slice, DecodeError> {
    let mut cs = root.parse();
    expect_tag(cs.load_uint(32)?, BLOCK_TAG as u64, "block")?;
    cs.skip_bits(32)?; // global_id
    let _info = cs.load_ref_cell()?;
    let _value_flow = cs.load_ref_cell()?;
    let _state_update = cs.load_ref_cell()?;
    let mut extra = cs.load_ref()?;
    expect_tag(extra.load_uint(32)?, BLOCK_EXTRA_TAG as u64, "block extra")?;
    Ok(extra)
}

/// The account-blocks dictionary: 256-bit account addresses mapped to
/// that account's transactions in this block. `None` when the block
/// carries no transactions.
pub fn account_blocks_dict(root: &Arc<Cell>) -> Result<Option<Dictionary>, DecodeError> {
    let mut extra = block_extra(root)?;
    let _in_msgs = extra.load_ref_cell()?;
    let _out_msgs = extra.load_ref_cell()?;
    let mut wrapper = extra.load_ref()?;
    if !wrapper.load_bit()? {
        return Ok(None);
    }
    let mut dict_root = wrapper.load_ref()?;
    Ok(Some(parse_dict(&mut dict_root, 256)?))
}

/// The masterchain extra section; absent for shard blocks.
fn mc_extra(root: &Arc<Cell>) -> Result<Slice, DecodeError> {
    let mut extra = block_extra(root)?;
    let _in_msgs = extra.load_ref_cell()?;
    let _out_msgs = extra.load_ref_cell()?;
    let _account_blocks = extra.load_ref_cell()?;
    extra.skip_bits(256)?; // rand_seed
    extra.skip_bits(256)?; // created_by
    if !extra.load_bit()? {
        return Err(DecodeError::UnexpectedStructure(
            "block has no masterchain extra section".into(),
        ));
    }
    let mut mc = extra.load_ref()?;
    expect_tag(mc.load_uint(16)?, MC_EXTRA_TAG as u64, "masterchain extra")?;
    Ok(mc)
}

/// The config dictionary of a masterchain block: 32-bit parameter
/// indices mapped to parameter cells.
pub fn config_dict(root: &Arc<Cell>) -> Result<Dictionary, DecodeError> {
    let mut mc = mc_extra(root)?;
    if !mc.load_bit()? {
        // config is only serialized when the key-block flag is set
        return Err(DecodeError::UnexpectedStructure(
            "block carries no config (not a key block)".into(),
        ));
    }
    if mc.load_bit()? {
        let _shard_hashes = mc.load_ref_cell()?;
    }
    if mc.load_bit()? {
        let _shard_fees = mc.load_ref_cell()?;
    }
    let _extra_group = mc.load_ref_cell()?;
    mc.skip_bits(256)?; // config_addr
    let mut config_root = mc.load_ref()?;
    parse_dict(&mut config_root, 32)
}

/// Decode a validator-set config parameter (either plain or extended
/// form). Parameter cells hold the set in their first reference.
pub fn parse_validator_set(param: &Slice) -> Result<ValidatorSet, DecodeError> {
    let mut cs = param.clone().load_ref()?;
    let tag = cs.load_uint(8)?;
    if tag != VALIDATORS_TAG && tag != VALIDATORS_EXT_TAG {
        return Err(DecodeError::UnexpectedStructure(format!(
            "bad validator set tag: {tag:#04x}"
        )));
    }
    let _utime_since = cs.load_uint(32)? as u32;
    let utime_until = cs.load_uint(32)? as u32;
    let total = cs.load_uint(16)? as usize;
    let _main = cs.load_uint(16)?;
    let declared_total_weight = if tag == VALIDATORS_EXT_TAG {
        Some(cs.load_uint(64)?)
    } else {
        None
    };

    let list = if tag == VALIDATORS_EXT_TAG {
        // extended form stores the list as an optional dictionary
        if !cs.load_bit()? {
            Vec::new()
        } else {
            let mut dict_root = cs.load_ref()?;
            decode_validator_list(&parse_dict(&mut dict_root, 16)?)?
        }
    } else {
        // plain form stores the dictionary root inline
        decode_validator_list(&parse_dict(&mut cs, 16)?)?
    };

    if list.len() != total {
        return Err(DecodeError::UnexpectedStructure(format!(
            "validator set declares {total} members, dictionary holds {}",
            list.len()
        )));
    }

    let set = ValidatorSet::new(list, utime_until);
    if let Some(w) = declared_total_weight {
        if w != set.total_weight {
            return Err(DecodeError::UnexpectedStructure(format!(
                "validator set declares total weight {w}, members sum to {}",
                set.total_weight
            )));
        }
    }
    Ok(set)
}

fn decode_validator_list(dict: &Dictionary) -> Result<Vec<ValidatorDescr>, DecodeError> {
    let mut list = Vec::with_capacity(dict.len());
    for (key, leaf) in dict.iter() {
        let mut cs = leaf.clone();
        let tag = cs.load_uint(8)?;
        if tag != VALIDATOR_TAG && tag != VALIDATOR_ADDR_TAG {
            return Err(DecodeError::UnexpectedStructure(format!(
                "bad validator descriptor tag: {tag:#04x}"
            )));
        }
        expect_tag(cs.load_uint(32)?, SIG_PUBKEY_TAG, "signature pubkey")?;
        let pubkey = PublicKey::from(cs.load_hash()?.into_inner());
        let weight = cs.load_uint(64)?;
        // validator_addr form carries an adnl address we do not use
        list.push(ValidatorDescr {
            pubkey,
            weight,
            index: key.as_u64() as u16,
        });
    }
    Ok(list)
}

/// Extract the current validator set, and the next set when the config
/// carries one, from a masterchain key block.
pub fn extract_validator_sets(
    root: &Arc<Cell>,
) -> Result<(ValidatorSet, Option<ValidatorSet>), DecodeError> {
    let config = config_dict(root)?;
    let current = config
        .get_u64(CONFIG_CURRENT_VALIDATORS)
        .ok_or_else(|| {
            DecodeError::UnexpectedStructure("config has no current validator set".into())
        })?;
    let current = parse_validator_set(current)?;
    let next = config
        .get_u64(CONFIG_NEXT_VALIDATORS)
        .map(parse_validator_set)
        .transpose()?;
    Ok((current, next))
}

fn expect_tag(got: u64, want: u64, what: &str) -> Result<(), DecodeError> {
    if got != want {
        return Err(DecodeError::UnexpectedStructure(format!(
            "bad {what} tag: {got:#x}, expected {want:#x}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildError, CellBuilder};
    use crate::dict::store_dict;
    use tonlite_common::Hash;

    /// Build a minimal but structurally complete block cell for tests.
    pub(crate) struct TestBlock {
        pub seqno: u32,
        pub key_block: bool,
        pub not_master: bool,
        pub prev_key_block_seqno: u32,
        pub account_blocks: Option<Arc<Cell>>,
        pub config: Option<Arc<Cell>>,
    }

    impl TestBlock {
        pub fn new(seqno: u32) -> Self {
            Self {
                seqno,
                key_block: false,
                not_master: false,
                prev_key_block_seqno: 0,
                account_blocks: None,
                config: None,
            }
        }

        pub fn build(&self) -> Arc<Cell> {
            let mut info = CellBuilder::new();
            info.store_uint(BLOCK_INFO_TAG as u64, 32).unwrap();
            info.store_uint(0, 32).unwrap(); // version
            info.store_bit(self.not_master).unwrap();
            info.store_uint(0, 5).unwrap(); // merge/split flags
            info.store_bit(self.key_block).unwrap();
            info.store_bit(false).unwrap(); // vert_seqno_incr
            info.store_uint(0, 8).unwrap(); // flags
            info.store_uint(self.seqno as u64, 32).unwrap();
            info.store_uint(0, 32).unwrap(); // vert_seq_no
            info.store_uint(0, 2 + 6 + 32).unwrap();
            info.store_uint(0x8000_0000_0000_0000, 64).unwrap(); // shard
            info.store_uint(1_700_000_000, 32).unwrap(); // gen_utime
            info.store_uint(0, 64).unwrap();
            info.store_uint(0, 64).unwrap();
            info.store_uint(0, 32).unwrap();
            info.store_uint(0, 32).unwrap();
            info.store_uint(0, 32).unwrap();
            info.store_uint(self.prev_key_block_seqno as u64, 32).unwrap();
            let info = info.build().unwrap();

            let mut wrapper = CellBuilder::new();
            match &self.account_blocks {
                Some(dict_root) => {
                    wrapper.store_bit(true).unwrap();
                    wrapper.store_ref(Arc::clone(dict_root)).unwrap();
                }
                None => {
                    wrapper.store_bit(false).unwrap();
                }
            }
            let wrapper = wrapper.build().unwrap();

            let mut extra = CellBuilder::new();
            extra.store_uint(BLOCK_EXTRA_TAG as u64, 32).unwrap();
            extra.store_ref(Cell::empty()).unwrap(); // in msgs
            extra.store_ref(Cell::empty()).unwrap(); // out msgs
            extra.store_ref(wrapper).unwrap();
            extra.store_bytes(&[0u8; 32]).unwrap(); // rand_seed
            extra.store_bytes(&[0u8; 32]).unwrap(); // created_by
            match &self.config {
                Some(config_root) => {
                    let mut mc = CellBuilder::new();
                    mc.store_uint(MC_EXTRA_TAG as u64, 16).unwrap();
                    mc.store_bit(self.key_block).unwrap();
                    mc.store_bit(false).unwrap(); // shard hashes
                    mc.store_bit(false).unwrap(); // shard fees
                    mc.store_ref(Cell::empty()).unwrap(); // extra group
                    mc.store_bytes(&[0u8; 32]).unwrap(); // config addr
                    mc.store_ref(Arc::clone(config_root)).unwrap();
                    extra.store_bit(true).unwrap();
                    extra.store_ref(mc.build().unwrap()).unwrap();
                }
                None => {
                    extra.store_bit(false).unwrap();
                }
            }
            let extra = extra.build().unwrap();

            let mut root = CellBuilder::new();
            root.store_uint(BLOCK_TAG as u64, 32).unwrap();
            root.store_uint(0, 32).unwrap(); // global_id
            root.store_ref(info).unwrap();
            root.store_ref(Cell::empty()).unwrap(); // value flow
            root.store_ref(Cell::empty()).unwrap(); // state update
            root.store_ref(extra).unwrap();
            root.build().unwrap()
        }
    }

    /// Serialize a validator set (extended form) as the cell a config
    /// dictionary leaf references.
    pub(crate) fn build_validator_set_param(
        validators: &[(PublicKey, u64)],
        utime_until: u32,
    ) -> Arc<Cell> {
        let total_weight: u64 = validators.iter().map(|(_, w)| *w).sum();
        let mut set = CellBuilder::new();
        set.store_uint(VALIDATORS_EXT_TAG, 8).unwrap();
        set.store_uint(0, 32).unwrap(); // utime_since
        set.store_uint(utime_until as u64, 32).unwrap();
        set.store_uint(validators.len() as u64, 16).unwrap();
        set.store_uint(validators.len() as u64, 16).unwrap(); // main
        set.store_uint(total_weight, 64).unwrap();

        let entries: Vec<(u64, (PublicKey, u64))> = validators
            .iter()
            .enumerate()
            .map(|(i, v)| (i as u64, v.clone()))
            .collect();
        store_dict(&mut set, &entries, 16, &|b, (pk, w): &(PublicKey, u64)| {
            b.store_uint(VALIDATOR_TAG, 8)?;
            b.store_uint(SIG_PUBKEY_TAG, 32)?;
            b.store_bytes(pk.as_ref())?;
            b.store_uint(*w, 64)?;
            Ok::<(), BuildError>(())
        })
        .unwrap();
        set.build().unwrap()
    }

    pub(crate) fn build_config(params: &[(u64, Arc<Cell>)]) -> Arc<Cell> {
        let mut b = CellBuilder::new();
        store_dict(&mut b, params, 32, &|b, cell: &Arc<Cell>| {
            // parameter leaves are stored by reference
            b.store_ref(Arc::clone(cell))?;
            Ok(())
        })
        .unwrap();
        let cell = b.build().unwrap();
        // unwrap the maybe + ref back to the bare dict root
        cell.parse().load_ref_cell().unwrap()
    }

    fn test_pubkey(seed: u8) -> PublicKey {
        PublicKey::from([seed; 32])
    }

    #[test]
    fn header_fields_decode() {
        let mut tb = TestBlock::new(4242);
        tb.key_block = true;
        tb.prev_key_block_seqno = 4000;
        let header = parse_block_header(&tb.build()).unwrap();
        assert_eq!(header.seqno, 4242);
        assert!(header.key_block);
        assert!(!header.not_master);
        assert_eq!(header.prev_key_block_seqno, 4000);
        assert_eq!(header.gen_utime, 1_700_000_000);
    }

    #[test]
    fn shardchain_flag_decodes() {
        let mut tb = TestBlock::new(7);
        tb.not_master = true;
        assert!(parse_block_header(&tb.build()).unwrap().not_master);
    }

    #[test]
    fn rejects_wrong_root_tag() {
        let mut b = CellBuilder::new();
        b.store_uint(0xdeadbeef, 32).unwrap();
        let err = parse_block_header(&b.build().unwrap()).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedStructure(_)));
    }

    #[test]
    fn empty_account_blocks_is_none() {
        let tb = TestBlock::new(1);
        assert!(account_blocks_dict(&tb.build()).unwrap().is_none());
    }

    #[test]
    fn validator_sets_extract_from_key_block() {
        let current = build_validator_set_param(
            &[(test_pubkey(1), 10), (test_pubkey(2), 20)],
            1_800_000_000,
        );
        let next = build_validator_set_param(&[(test_pubkey(3), 30)], 1_900_000_000);

        let mut tb = TestBlock::new(100);
        tb.key_block = true;
        tb.config = Some(build_config(&[
            (CONFIG_CURRENT_VALIDATORS, current),
            (CONFIG_NEXT_VALIDATORS, next),
        ]));
        let root = tb.build();

        let (cur, nxt) = extract_validator_sets(&root).unwrap();
        assert_eq!(cur.list.len(), 2);
        assert_eq!(cur.total_weight, 30);
        assert_eq!(cur.utime_until, 1_800_000_000);
        assert_eq!(cur.list[0].weight, 10);
        assert_eq!(cur.list[1].index, 1);

        let nxt = nxt.unwrap();
        assert_eq!(nxt.list.len(), 1);
        assert_eq!(nxt.total_weight, 30);
        assert_eq!(nxt.list[0].pubkey, test_pubkey(3));
    }

    #[test]
    fn missing_next_set_is_ok() {
        let current = build_validator_set_param(&[(test_pubkey(1), 10)], 0);
        let mut tb = TestBlock::new(100);
        tb.key_block = true;
        tb.config = Some(build_config(&[(CONFIG_CURRENT_VALIDATORS, current)]));
        let (_, next) = extract_validator_sets(&tb.build()).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn non_key_block_has_no_config() {
        let tb = TestBlock::new(5);
        assert!(extract_validator_sets(&tb.build()).is_err());
    }

    #[test]
    fn validator_set_sits_one_ref_below_the_config_leaf() {
        let param = build_validator_set_param(&[(test_pubkey(9), 7)], 0);
        let mut tb = TestBlock::new(1);
        tb.key_block = true;
        tb.config = Some(build_config(&[(CONFIG_CURRENT_VALIDATORS, param.clone())]));

        let config = config_dict(&tb.build()).unwrap();
        let leaf = config.get_u64(CONFIG_CURRENT_VALIDATORS).unwrap();
        assert_eq!(leaf.clone().load_ref_cell().unwrap().hash(), param.hash());
        assert_eq!(parse_validator_set(leaf).unwrap().total_weight, 7);
    }

    #[test]
    fn mismatched_total_weight_rejected() {
        // Tamper with the declared total weight
        let set_cell = build_validator_set_param(&[(test_pubkey(1), 10)], 0);
        let mut cs = set_cell.parse();
        let mut rebuilt = CellBuilder::new();
        rebuilt.store_uint(cs.load_uint(8).unwrap(), 8).unwrap();
        rebuilt.store_uint(cs.load_uint(32).unwrap(), 32).unwrap();
        rebuilt.store_uint(cs.load_uint(32).unwrap(), 32).unwrap();
        rebuilt.store_uint(cs.load_uint(16).unwrap(), 16).unwrap();
        rebuilt.store_uint(cs.load_uint(16).unwrap(), 16).unwrap();
        let _honest = cs.load_uint(64).unwrap();
        rebuilt.store_uint(999, 64).unwrap();
        rebuilt.store_bit(cs.load_bit().unwrap()).unwrap();
        rebuilt.store_ref(cs.load_ref_cell().unwrap()).unwrap();

        let mut param = CellBuilder::new();
        param.store_ref(rebuilt.build().unwrap()).unwrap();
        let param = param.build().unwrap();
        assert!(parse_validator_set(&param.parse()).is_err());
    }
}
