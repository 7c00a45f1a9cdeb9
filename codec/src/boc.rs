//! Bag-of-cells wire format: decoding fetched block bytes into a cell
//! tree, and single-root encoding for messages handed to the on-chain
//! collaborator.

use crate::cell::Cell;
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tonlite_common::Hash;

/// Serialized bag-of-cells magic.
const BOC_MAGIC: u32 = 0xb5ee9c72;

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            bail!(
                "bag of cells truncated: wanted {n} bytes at offset {}, have {}",
                self.pos,
                self.bytes.len()
            );
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Big-endian unsigned integer of 1..=8 bytes.
    fn uint(&mut self, n: usize) -> Result<u64> {
        let mut v = 0u64;
        for b in self.take(n)? {
            v = (v << 8) | (*b as u64);
        }
        Ok(v)
    }
}

/// Decode a bag of cells into its (single) root cell. The input is
/// untrusted network data: every index and size is checked and any
/// violation fails with a decode error rather than panicking.
pub fn decode(bytes: &[u8]) -> Result<Arc<Cell>> {
    let mut r = ByteReader::new(bytes);

    let magic = r.uint(4)? as u32;
    if magic != BOC_MAGIC {
        bail!("bad bag-of-cells magic: {magic:#010x}");
    }

    let flags = r.byte()?;
    let has_index = flags & 0x80 != 0;
    let has_crc = flags & 0x40 != 0;
    let ref_size = (flags & 0x07) as usize;
    if ref_size == 0 || ref_size > 4 {
        bail!("bad reference size: {ref_size}");
    }
    let offset_size = r.byte()? as usize;
    if offset_size == 0 || offset_size > 8 {
        bail!("bad offset size: {offset_size}");
    }

    let cell_count = r.uint(ref_size)? as usize;
    let root_count = r.uint(ref_size)? as usize;
    let absent_count = r.uint(ref_size)? as usize;
    let _total_cells_size = r.uint(offset_size)?;

    if root_count != 1 {
        bail!("expected a single root, got {root_count}");
    }
    if absent_count != 0 {
        bail!("absent cells are not supported");
    }
    if cell_count == 0 || cell_count > 1 << 20 {
        bail!("implausible cell count: {cell_count}");
    }

    let root_index = r.uint(ref_size)? as usize;
    if root_index >= cell_count {
        bail!("root index {root_index} out of range ({cell_count} cells)");
    }

    if has_index {
        r.take(cell_count * offset_size)?;
    }

    // First pass: raw cell records. References are stored as indices
    // and always point to later cells (topological order).
    struct RawCell {
        data: Vec<u8>,
        bit_len: usize,
        refs: Vec<usize>,
    }
    let mut raw = Vec::with_capacity(cell_count);
    for i in 0..cell_count {
        let d1 = r.byte()?;
        let d2 = r.byte()? as usize;
        if d1 & 0x08 != 0 {
            bail!("exotic cell #{i} is not supported");
        }
        let ref_count = (d1 & 0x07) as usize;
        if ref_count > 4 {
            bail!("cell #{i} has {ref_count} references");
        }

        let byte_len = d2.div_ceil(2);
        let data = r.take(byte_len)?.to_vec();
        let bit_len = if d2 % 2 == 0 {
            byte_len * 8
        } else {
            // Non-aligned data ends with a completion tag: a 1 bit
            // followed by zeros.
            let last = *data.last().ok_or_else(|| anyhow!("empty non-aligned cell #{i}"))?;
            if last == 0 {
                bail!("cell #{i} missing completion tag");
            }
            byte_len * 8 - (last.trailing_zeros() as usize) - 1
        };

        let mut refs = Vec::with_capacity(ref_count);
        for _ in 0..ref_count {
            let target = r.uint(ref_size)? as usize;
            if target <= i || target >= cell_count {
                bail!("cell #{i} reference to #{target} breaks topological order");
            }
            refs.push(target);
        }
        raw.push(RawCell {
            data,
            bit_len,
            refs,
        });
    }

    if has_crc {
        r.take(4)?;
    }

    tracing::trace!(cell_count, root_index, "decoded bag-of-cells layout");

    // Second pass, bottom-up: children exist before their parents.
    let mut built: Vec<Option<Arc<Cell>>> = vec![None; cell_count];
    for i in (0..cell_count).rev() {
        let rc = &raw[i];
        let refs = rc
            .refs
            .iter()
            .map(|t| built[*t].clone().ok_or_else(|| anyhow!("unresolved reference")))
            .collect::<Result<Vec<_>>>()?;
        let cell = Cell::new(rc.data.clone(), rc.bit_len, refs)
            .map_err(|e| anyhow!("cell #{i}: {e}"))?;
        built[i] = Some(cell);
    }

    built[root_index].clone().ok_or_else(|| anyhow!("root cell unresolved"))
}

/// Encode a single-root cell tree as a bag of cells (no index, no CRC).
pub fn encode(root: &Arc<Cell>) -> Vec<u8> {
    // Topological order with the root first; duplicate subtrees are
    // stored once, keyed by representation hash. Ordering by maximum
    // distance from the root guarantees every reference points forward.
    let mut depth_of: HashMap<Hash<32>, (u64, Arc<Cell>)> = HashMap::new();
    collect(root, 0, &mut depth_of);
    let mut order: Vec<(u64, Arc<Cell>)> = depth_of.into_values().collect();
    order.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.hash().cmp(&b.1.hash())));
    let order: Vec<Arc<Cell>> = order.into_iter().map(|(_, c)| c).collect();
    let index: HashMap<Hash<32>, usize> =
        order.iter().enumerate().map(|(i, c)| (c.hash(), i)).collect();

    let cell_count = order.len();
    let ref_size = ref_size_for(cell_count);

    let mut payload = Vec::new();
    for cell in &order {
        payload.extend_from_slice(&cell.descriptors());
        payload.extend_from_slice(&cell.padded_data());
        for r in cell.refs() {
            let target = index[&r.hash()];
            payload.extend_from_slice(&(target as u64).to_be_bytes()[8 - ref_size..]);
        }
    }

    let offset_size = byte_width(payload.len() as u64);
    let mut out = Vec::new();
    out.extend_from_slice(&BOC_MAGIC.to_be_bytes());
    out.push(ref_size as u8);
    out.push(offset_size as u8);
    out.extend_from_slice(&(cell_count as u64).to_be_bytes()[8 - ref_size..]);
    out.extend_from_slice(&1u64.to_be_bytes()[8 - ref_size..]); // roots
    out.extend_from_slice(&0u64.to_be_bytes()[8 - ref_size..]); // absent
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes()[8 - offset_size..]);
    out.extend_from_slice(&0u64.to_be_bytes()[8 - ref_size..]); // root index
    out.extend_from_slice(&payload);
    out
}

/// Record each unique cell with its maximum distance from the root.
fn collect(cell: &Arc<Cell>, depth: u64, depth_of: &mut HashMap<Hash<32>, (u64, Arc<Cell>)>) {
    match depth_of.entry(cell.hash()) {
        std::collections::hash_map::Entry::Occupied(mut e) => {
            if e.get().0 >= depth {
                return;
            }
            e.get_mut().0 = depth;
        }
        std::collections::hash_map::Entry::Vacant(v) => {
            v.insert((depth, Arc::clone(cell)));
        }
    }
    for r in cell.refs() {
        collect(r, depth + 1, depth_of);
    }
}

fn ref_size_for(cell_count: usize) -> usize {
    byte_width(cell_count as u64)
}

fn byte_width(value: u64) -> usize {
    std::cmp::max(1, (64 - value.leading_zeros() as usize).div_ceil(8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CellBuilder;

    fn sample_tree() -> Arc<Cell> {
        let mut leaf = CellBuilder::new();
        leaf.store_uint(0xdead_beef, 32).unwrap();
        leaf.store_uint(0b101, 3).unwrap();
        let leaf = leaf.build().unwrap();

        let mut mid = CellBuilder::new();
        mid.store_uint(7, 4).unwrap();
        mid.store_ref(Arc::clone(&leaf)).unwrap();
        let mid = mid.build().unwrap();

        let mut root = CellBuilder::new();
        root.store_uint(0x11ef55aa, 32).unwrap();
        root.store_ref(mid).unwrap();
        root.store_ref(leaf).unwrap();
        root.build().unwrap()
    }

    #[test]
    fn encode_decode_round_trip() {
        let root = sample_tree();
        let bytes = encode(&root);
        let back = decode(&bytes).unwrap();
        assert_eq!(back.hash(), root.hash());
        assert_eq!(back.refs().len(), 2);
        // Shared leaf deduplicated in the serialized form
        assert_eq!(back.refs()[0].refs()[0].hash(), back.refs()[1].hash());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = encode(&sample_tree());
        bytes[0] ^= 0xff;
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn rejects_truncation() {
        let bytes = encode(&sample_tree());
        for cut in [5, 10, bytes.len() - 1] {
            assert!(decode(&bytes[..cut]).is_err(), "cut at {cut} should fail");
        }
    }

    #[test]
    fn rejects_forward_reference_violation() {
        // Hand-craft a two-cell boc where cell 1 points back at cell 0
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&BOC_MAGIC.to_be_bytes());
        bytes.push(1); // ref size
        bytes.push(1); // offset size
        bytes.push(2); // cells
        bytes.push(1); // roots
        bytes.push(0); // absent
        bytes.push(6); // total size
        bytes.push(0); // root index
        bytes.extend_from_slice(&[1, 0, 1]); // cell 0: 1 ref, empty, -> 1
        bytes.extend_from_slice(&[1, 0, 0]); // cell 1: 1 ref, empty, -> 0 (bad)
        assert!(decode(&bytes).is_err());
    }
}
