//! Immutable bit-tree cells and the read cursor over them.
//!
//! A cell holds up to 1023 data bits and up to 4 references to child
//! cells. Cells are immutable once constructed from wire bytes; every
//! cell carries its standard representation hash and depth, computed at
//! construction time.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tonlite_common::{DecodeError, Hash};

/// Maximum number of data bits in one cell.
pub const MAX_DATA_BITS: usize = 1023;

/// Maximum number of child references in one cell.
pub const MAX_REFS: usize = 4;

/// One node of the bit tree: an ordered bit sequence plus an ordered
/// list of child references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
    hash: Hash<32>,
    depth: u16,
}

impl Cell {
    /// Construct a cell from bit-packed data (most significant bit
    /// first) and child references. Fails on oversize data or refs.
    pub fn new(data: Vec<u8>, bit_len: usize, refs: Vec<Arc<Cell>>) -> Result<Arc<Self>, DecodeError> {
        if bit_len > MAX_DATA_BITS || data.len() < bit_len.div_ceil(8) {
            return Err(DecodeError::UnexpectedStructure(format!(
                "bad cell data: {bit_len} bits in {} bytes",
                data.len()
            )));
        }
        if refs.len() > MAX_REFS {
            return Err(DecodeError::UnexpectedStructure(format!(
                "cell has {} references, maximum is {MAX_REFS}",
                refs.len()
            )));
        }

        let depth = refs.iter().map(|r| r.depth + 1).max().unwrap_or(0);
        let hash = Self::representation_hash(&data, bit_len, &refs);
        Ok(Arc::new(Self {
            data,
            bit_len,
            refs,
            hash,
            depth,
        }))
    }

    /// An empty cell (no data, no references).
    pub fn empty() -> Arc<Self> {
        Self::new(Vec::new(), 0, Vec::new()).expect("empty cell is always valid")
    }

    /// Number of data bits.
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Bit-packed data, MSB first. Bits past `bit_len` in the final
    /// byte are zero.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Child references in order.
    pub fn refs(&self) -> &[Arc<Cell>] {
        &self.refs
    }

    /// Standard representation hash of this cell.
    pub fn hash(&self) -> Hash<32> {
        self.hash
    }

    /// Tree depth: 0 for a leaf, 1 + max child depth otherwise.
    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Open a read cursor positioned at the start of this cell.
    pub fn parse(self: &Arc<Self>) -> Slice {
        Slice::new(Arc::clone(self))
    }

    /// Descriptor bytes used in both hashing and bag-of-cells output.
    /// d1 encodes the reference count (ordinary cells, level 0), d2 the
    /// data length with an odd-ness marker for non-byte-aligned data.
    pub(crate) fn descriptors(&self) -> [u8; 2] {
        let d1 = self.refs.len() as u8;
        let d2 = (self.bit_len / 8 + self.bit_len.div_ceil(8)) as u8;
        [d1, d2]
    }

    /// Data bytes as serialized: non-byte-aligned data gets a single 1
    /// completion bit appended, then zero padding to the byte boundary.
    pub(crate) fn padded_data(&self) -> Vec<u8> {
        let byte_len = self.bit_len.div_ceil(8);
        let mut out = self.data[..byte_len].to_vec();
        if self.bit_len % 8 != 0 {
            let used = self.bit_len % 8;
            let last = &mut out[byte_len - 1];
            let keep_mask = !(0xffu8 >> used);
            *last = (*last & keep_mask) | (0x80 >> used);
        }
        out
    }

    fn representation_hash(data: &[u8], bit_len: usize, refs: &[Arc<Cell>]) -> Hash<32> {
        // Hash input: descriptors, padded data, child depths (u16 BE),
        // child hashes. This must match the on-chain hashing exactly.
        let mut hasher = Sha256::new();

        let d1 = refs.len() as u8;
        let d2 = (bit_len / 8 + bit_len.div_ceil(8)) as u8;
        hasher.update([d1, d2]);

        let byte_len = bit_len.div_ceil(8);
        let mut padded = data[..byte_len].to_vec();
        if bit_len % 8 != 0 {
            let used = bit_len % 8;
            let keep_mask = !(0xffu8 >> used);
            padded[byte_len - 1] = (padded[byte_len - 1] & keep_mask) | (0x80 >> used);
        }
        hasher.update(&padded);

        for r in refs {
            hasher.update(r.depth.to_be_bytes());
        }
        for r in refs {
            hasher.update(r.hash.as_ref());
        }
        Hash::new(hasher.finalize().into())
    }
}

/// Read-only cursor into one cell: a bit offset and a reference offset,
/// both advancing monotonically. Descending into a child produces a
/// fresh cursor scoped to that child. Never reads past the cell's bit
/// length or reference count.
#[derive(Debug, Clone)]
pub struct Slice {
    cell: Arc<Cell>,
    bit_pos: usize,
    ref_pos: usize,
}

impl Slice {
    fn new(cell: Arc<Cell>) -> Self {
        Self {
            cell,
            bit_pos: 0,
            ref_pos: 0,
        }
    }

    /// The cell this cursor reads from.
    pub fn cell(&self) -> &Arc<Cell> {
        &self.cell
    }

    /// Bits left to read.
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len - self.bit_pos
    }

    /// References left to descend into.
    pub fn remaining_refs(&self) -> usize {
        self.cell.refs.len() - self.ref_pos
    }

    fn bit_at(&self, pos: usize) -> bool {
        (self.cell.data[pos / 8] >> (7 - pos % 8)) & 1 == 1
    }

    fn check_bits(&self, wanted: usize) -> Result<(), DecodeError> {
        if self.bit_pos + wanted > self.cell.bit_len {
            return Err(DecodeError::BitUnderflow {
                offset: self.bit_pos,
                wanted,
                available: self.cell.bit_len,
            });
        }
        Ok(())
    }

    /// Read a single bit.
    pub fn load_bit(&mut self) -> Result<bool, DecodeError> {
        self.check_bits(1)?;
        let bit = self.bit_at(self.bit_pos);
        self.bit_pos += 1;
        Ok(bit)
    }

    /// Read a fixed-width unsigned integer of up to 64 bits.
    pub fn load_uint(&mut self, bits: usize) -> Result<u64, DecodeError> {
        debug_assert!(bits <= 64);
        self.check_bits(bits)?;
        let mut value = 0u64;
        for _ in 0..bits {
            value = (value << 1) | (self.bit_at(self.bit_pos) as u64);
            self.bit_pos += 1;
        }
        Ok(value)
    }

    /// Peek at a fixed-width unsigned integer without advancing.
    pub fn preload_uint(&self, bits: usize) -> Result<u64, DecodeError> {
        let mut probe = self.clone();
        probe.load_uint(bits)
    }

    /// Read `n` bits into a bit-packed byte vector (MSB first, zero
    /// padded at the end).
    pub fn load_bits(&mut self, n: usize) -> Result<Vec<u8>, DecodeError> {
        self.check_bits(n)?;
        let mut out = vec![0u8; n.div_ceil(8)];
        for i in 0..n {
            if self.bit_at(self.bit_pos) {
                out[i / 8] |= 0x80 >> (i % 8);
            }
            self.bit_pos += 1;
        }
        Ok(out)
    }

    /// Read a 256-bit value as a 32-byte hash-shaped array.
    pub fn load_hash(&mut self) -> Result<Hash<32>, DecodeError> {
        let bytes = self.load_bits(256)?;
        Ok(Hash::try_from(bytes).expect("load_bits(256) yields 32 bytes"))
    }

    /// Skip `n` bits.
    pub fn skip_bits(&mut self, n: usize) -> Result<(), DecodeError> {
        self.check_bits(n)?;
        self.bit_pos += n;
        Ok(())
    }

    /// Take the next child reference as a cell, consuming the slot.
    pub fn load_ref_cell(&mut self) -> Result<Arc<Cell>, DecodeError> {
        if self.ref_pos >= self.cell.refs.len() {
            return Err(DecodeError::RefUnderflow {
                wanted: self.ref_pos,
                available: self.cell.refs.len(),
            });
        }
        let cell = Arc::clone(&self.cell.refs[self.ref_pos]);
        self.ref_pos += 1;
        Ok(cell)
    }

    /// Descend into the next child reference as a fresh cursor.
    pub fn load_ref(&mut self) -> Result<Slice, DecodeError> {
        Ok(self.load_ref_cell()?.parse())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_bits_in_order() {
        // 1010 1100 11
        let cell = Cell::new(vec![0b1010_1100, 0b1100_0000], 10, vec![]).unwrap();
        let mut s = cell.parse();
        assert!(s.load_bit().unwrap());
        assert!(!s.load_bit().unwrap());
        assert_eq!(s.load_uint(6).unwrap(), 0b10_1100);
        assert_eq!(s.remaining_bits(), 2);
        assert_eq!(s.load_uint(2).unwrap(), 0b11);
        assert!(matches!(
            s.load_bit(),
            Err(DecodeError::BitUnderflow { .. })
        ));
    }

    #[test]
    fn preload_does_not_advance() {
        let cell = Cell::new(vec![0x70], 8, vec![]).unwrap();
        let s = cell.parse();
        assert_eq!(s.preload_uint(4).unwrap(), 7);
        assert_eq!(s.preload_uint(4).unwrap(), 7);
        assert_eq!(s.remaining_bits(), 8);
    }

    #[test]
    fn ref_descent_consumes_slots() {
        let child = Cell::new(vec![0xff], 8, vec![]).unwrap();
        let parent = Cell::new(vec![], 0, vec![Arc::clone(&child)]).unwrap();
        let mut s = parent.parse();
        let mut c = s.load_ref().unwrap();
        assert_eq!(c.load_uint(8).unwrap(), 0xff);
        assert!(matches!(
            s.load_ref(),
            Err(DecodeError::RefUnderflow { .. })
        ));
    }

    #[test]
    fn depth_and_hash_track_children() {
        let leaf = Cell::new(vec![0x42], 8, vec![]).unwrap();
        let mid = Cell::new(vec![], 0, vec![Arc::clone(&leaf)]).unwrap();
        let root = Cell::new(vec![], 0, vec![Arc::clone(&mid)]).unwrap();
        assert_eq!(leaf.depth(), 0);
        assert_eq!(root.depth(), 2);
        assert_ne!(root.hash(), mid.hash());

        // Same content, same hash
        let leaf2 = Cell::new(vec![0x42], 8, vec![]).unwrap();
        assert_eq!(leaf.hash(), leaf2.hash());
    }

    #[test]
    fn padded_data_sets_completion_bit() {
        // 5 bits: 10110 -> byte 1011_0100 (completion bit after data)
        let cell = Cell::new(vec![0b1011_0000], 5, vec![]).unwrap();
        assert_eq!(cell.padded_data(), vec![0b1011_0100]);
        assert_eq!(cell.descriptors(), [0, 1]);

        let aligned = Cell::new(vec![0xab], 8, vec![]).unwrap();
        assert_eq!(aligned.padded_data(), vec![0xab]);
        assert_eq!(aligned.descriptors(), [0, 2]);
    }

    #[test]
    fn oversize_rejected() {
        assert!(Cell::new(vec![0u8; 128], 1024, vec![]).is_err());
        let child = Cell::empty();
        let refs = vec![child.clone(), child.clone(), child.clone(), child.clone(), child];
        assert!(Cell::new(vec![], 0, refs).is_err());
    }
}
