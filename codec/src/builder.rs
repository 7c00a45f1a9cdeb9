//! Minimal cell writer, only what re-presenting verified data to the
//! on-chain collaborator needs: bits, fixed-width uints, byte strings
//! and child references.

use crate::cell::{Cell, MAX_DATA_BITS, MAX_REFS};
use std::sync::Arc;
use thiserror::Error;

/// Cell construction error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BuildError {
    #[error("cell data overflow: {0} bits over the {MAX_DATA_BITS}-bit limit")]
    DataOverflow(usize),

    #[error("cell reference overflow: more than {MAX_REFS} references")]
    RefOverflow,

    #[error("value {value} does not fit in {bits} bits")]
    ValueOverflow { value: u64, bits: usize },
}

/// Append-only builder for one cell.
#[derive(Debug, Clone, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bits written so far.
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// References attached so far.
    pub fn ref_count(&self) -> usize {
        self.refs.len()
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self, BuildError> {
        if self.bit_len + 1 > MAX_DATA_BITS {
            return Err(BuildError::DataOverflow(1));
        }
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let pos = self.bit_len;
            self.data[pos / 8] |= 0x80 >> (pos % 8);
        }
        self.bit_len += 1;
        Ok(self)
    }

    /// Store a fixed-width unsigned integer (up to 64 bits), big-endian.
    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self, BuildError> {
        debug_assert!(bits <= 64);
        if bits < 64 && value >> bits != 0 {
            return Err(BuildError::ValueOverflow { value, bits });
        }
        for i in (0..bits).rev() {
            self.store_bit((value >> i) & 1 == 1)?;
        }
        Ok(self)
    }

    /// Store whole bytes as 8*len bits.
    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, BuildError> {
        for b in bytes {
            self.store_uint(*b as u64, 8)?;
        }
        Ok(self)
    }

    /// Store `n` bits from a bit-packed (MSB first) byte slice.
    pub fn store_bits(&mut self, bits: &[u8], n: usize) -> Result<&mut Self, BuildError> {
        debug_assert!(bits.len() >= n.div_ceil(8));
        for i in 0..n {
            self.store_bit((bits[i / 8] >> (7 - i % 8)) & 1 == 1)?;
        }
        Ok(self)
    }

    /// Attach a child reference.
    pub fn store_ref(&mut self, cell: Arc<Cell>) -> Result<&mut Self, BuildError> {
        if self.refs.len() >= MAX_REFS {
            return Err(BuildError::RefOverflow);
        }
        self.refs.push(cell);
        Ok(self)
    }

    /// Finish the cell.
    pub fn build(self) -> Result<Arc<Cell>, BuildError> {
        Cell::new(self.data, self.bit_len, self.refs)
            .map_err(|_| BuildError::DataOverflow(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_slice() {
        let mut b = CellBuilder::new();
        b.store_uint(0x8eaa9d76, 32).unwrap();
        b.store_bit(true).unwrap();
        b.store_uint(0x2a, 7).unwrap();
        b.store_ref(Cell::empty()).unwrap();
        let cell = b.build().unwrap();

        let mut s = cell.parse();
        assert_eq!(s.load_uint(32).unwrap(), 0x8eaa9d76);
        assert!(s.load_bit().unwrap());
        assert_eq!(s.load_uint(7).unwrap(), 0x2a);
        assert_eq!(s.remaining_bits(), 0);
        assert_eq!(s.remaining_refs(), 1);
    }

    #[test]
    fn rejects_value_wider_than_field() {
        let mut b = CellBuilder::new();
        assert_eq!(
            b.store_uint(256, 8).unwrap_err(),
            BuildError::ValueOverflow { value: 256, bits: 8 }
        );
    }

    #[test]
    fn rejects_overflow() {
        let mut b = CellBuilder::new();
        for _ in 0..MAX_DATA_BITS {
            b.store_bit(false).unwrap();
        }
        assert!(b.store_bit(false).is_err());

        let mut b = CellBuilder::new();
        for _ in 0..MAX_REFS {
            b.store_ref(Cell::empty()).unwrap();
        }
        assert_eq!(b.store_ref(Cell::empty()).unwrap_err(), BuildError::RefOverflow);
    }

    #[test]
    fn builder_matches_direct_cell() {
        let mut b = CellBuilder::new();
        b.store_bytes(&[0xde, 0xad]).unwrap();
        let built = b.build().unwrap();
        let direct = Cell::new(vec![0xde, 0xad], 16, vec![]).unwrap();
        assert_eq!(built.hash(), direct.hash());
    }
}
