//! Dictionary (hashmap) codec.
//!
//! Dictionaries are serialized as a Patricia-style binary trie: every
//! node carries a variable-length branch label in one of three
//! encodings, forks have exactly two children (left extends the key
//! with a 0 bit, right with a 1 bit), and a leaf is reached when the
//! accumulated key length equals the dictionary's fixed key width.
//!
//! The decoder is structure-only: it maps each full key to a cursor at
//! the start of its leaf payload and never interprets the payload, so
//! it serves plain and augmented dictionaries alike.

use crate::builder::{BuildError, CellBuilder};
use crate::cell::Slice;
use tonlite_common::{DecodeError, Hash};

/// A dictionary key: up to 256 bits, big-endian, right-aligned in the
/// raw array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DictKey {
    bits: usize,
    raw: [u8; 32],
}

impl DictKey {
    /// Build a key from the bit path accumulated along a trie walk.
    fn from_path(path: &[bool]) -> Self {
        debug_assert!(path.len() <= 256);
        let mut raw = [0u8; 32];
        for (i, bit) in path.iter().rev().enumerate() {
            if *bit {
                raw[31 - i / 8] |= 1 << (i % 8);
            }
        }
        Self {
            bits: path.len(),
            raw,
        }
    }

    /// Key width in bits.
    pub fn bits(&self) -> usize {
        self.bits
    }

    /// The key as an unsigned integer; only valid for widths <= 64.
    pub fn as_u64(&self) -> u64 {
        debug_assert!(self.bits <= 64);
        u64::from_be_bytes(self.raw[24..32].try_into().expect("8 bytes"))
    }

    /// The key as a 32-byte value (256-bit keys).
    pub fn as_hash(&self) -> Hash<32> {
        Hash::new(self.raw)
    }
}

/// Key-ordered mapping from fixed-width keys to leaf cursors. Insertion
/// order follows the in-order trie traversal, which is ascending
/// numeric key order.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: Vec<(DictKey, Slice)>,
}

impl Dictionary {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(DictKey, Slice)> {
        self.entries.iter()
    }

    /// Look up a leaf by integer key (widths <= 64 bits).
    pub fn get_u64(&self, key: u64) -> Option<&Slice> {
        self.entries.iter().find(|(k, _)| k.as_u64() == key).map(|(_, s)| s)
    }
}

/// Count consecutive 1 bits up to a terminating 0 bit.
fn read_unary(s: &mut Slice) -> Result<usize, DecodeError> {
    let mut n = 0;
    while s.load_bit()? {
        n += 1;
    }
    Ok(n)
}

/// Bit width of the length field in long and same labels: enough bits
/// to express any length in 0..=m.
fn label_len_bits(m: usize) -> usize {
    usize::BITS as usize - m.leading_zeros() as usize
}

/// Decode one branch label against a remaining key length of `m` bits.
///
/// Three encodings share a 1-2 bit discriminator:
/// - `0`   short: unary length, then that many literal bits
/// - `10`  long: binary length, then that many literal bits
/// - `11`  same: one bit, repeated a binary-coded number of times
///
/// A label longer than `m` is malformed data, never truncated.
fn read_label(s: &mut Slice, m: usize) -> Result<Vec<bool>, DecodeError> {
    let n;
    let mut label;
    if !s.load_bit()? {
        // hml_short
        n = read_unary(s)?;
        check_label_fits(n, m)?;
        label = Vec::with_capacity(n);
        for _ in 0..n {
            label.push(s.load_bit()?);
        }
    } else if !s.load_bit()? {
        // hml_long
        n = s.load_uint(label_len_bits(m))? as usize;
        check_label_fits(n, m)?;
        label = Vec::with_capacity(n);
        for _ in 0..n {
            label.push(s.load_bit()?);
        }
    } else {
        // hml_same
        let v = s.load_bit()?;
        n = s.load_uint(label_len_bits(m))? as usize;
        check_label_fits(n, m)?;
        label = vec![v; n];
    }
    Ok(label)
}

fn check_label_fits(n: usize, m: usize) -> Result<(), DecodeError> {
    if n > m {
        return Err(DecodeError::LabelOverrun {
            label_bits: n,
            remaining: m,
        });
    }
    Ok(())
}

/// Parse a dictionary whose root node starts at `root`, with fixed key
/// width `key_bits`. Returns every leaf keyed by the bit path that
/// reaches it.
pub fn parse_dict(root: &mut Slice, key_bits: usize) -> Result<Dictionary, DecodeError> {
    debug_assert!(key_bits <= 256);
    let mut dict = Dictionary::default();
    let label = read_label(root, key_bits)?;
    let remaining = key_bits - label.len();
    parse_node(root.clone(), remaining, label, &mut dict)?;
    Ok(dict)
}

fn parse_node(
    mut cs: Slice,
    m: usize,
    prefix: Vec<bool>,
    dict: &mut Dictionary,
) -> Result<(), DecodeError> {
    if m == 0 {
        dict.entries.push((DictKey::from_path(&prefix), cs));
        return Ok(());
    }

    // Fork: exactly two children, left extends the key with 0.
    for branch in [false, true] {
        let mut child = cs.load_ref()?;
        let label = read_label(&mut child, m - 1)?;
        let mut child_prefix = prefix.clone();
        child_prefix.push(branch);
        child_prefix.extend_from_slice(&label);
        parse_node(child, m - 1 - label.len(), child_prefix, dict)?;
    }
    Ok(())
}

/* Writer ****************************************************************** */

/// Store a branch label choosing the shortest of the three encodings.
/// Ties break in the order short, long, same.
fn store_label(b: &mut CellBuilder, label: &[bool], m: usize) -> Result<(), BuildError> {
    let n = label.len();
    let len_bits = label_len_bits(m);

    let short_len = 1 + (n + 1) + n;
    let long_len = 2 + len_bits + n;
    let all_same = n > 0 && label.iter().all(|b| *b == label[0]);
    let same_len = if all_same { 3 + len_bits } else { usize::MAX };

    if short_len <= long_len && short_len <= same_len {
        b.store_bit(false)?;
        for _ in 0..n {
            b.store_bit(true)?;
        }
        b.store_bit(false)?;
        for bit in label {
            b.store_bit(*bit)?;
        }
    } else if long_len <= same_len {
        b.store_bit(true)?;
        b.store_bit(false)?;
        b.store_uint(n as u64, len_bits)?;
        for bit in label {
            b.store_bit(*bit)?;
        }
    } else {
        b.store_bit(true)?;
        b.store_bit(true)?;
        b.store_bit(label[0])?;
        b.store_uint(n as u64, len_bits)?;
    }
    Ok(())
}

/// Serialize a dictionary with `key_bits`-wide integer keys as an
///// optional-root hashmap: one maybe bit, then a reference to the root
/// node when non-empty. This is the layout every produced wire message
/// uses for its dictionary fields.
pub fn store_dict<V>(
    b: &mut CellBuilder,
    entries: &[(u64, V)],
    key_bits: usize,
    write_value: &impl Fn(&mut CellBuilder, &V) -> Result<(), BuildError>,
) -> Result<(), BuildError> {
    debug_assert!(key_bits <= 64);
    if entries.is_empty() {
        b.store_bit(false)?;
        return Ok(());
    }

    let mut sorted: Vec<(Vec<bool>, &V)> = entries
        .iter()
        .map(|(k, v)| {
            let bits = (0..key_bits).rev().map(|i| (k >> i) & 1 == 1).collect();
            (bits, v)
        })
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut root = CellBuilder::new();
    store_node(&mut root, &sorted, 0, key_bits, write_value)?;
    b.store_bit(true)?;
    b.store_ref(root.build()?)?;
    Ok(())
}

/// Write one trie node covering `entries`, whose key bits up to `done`
/// are already consumed. `m` is the remaining key length.
fn store_node<V>(
    b: &mut CellBuilder,
    entries: &[(Vec<bool>, &V)],
    done: usize,
    m: usize,
    write_value: &impl Fn(&mut CellBuilder, &V) -> Result<(), BuildError>,
) -> Result<(), BuildError> {
    // Longest common prefix of the remaining key bits becomes the label
    let first = &entries[0].0;
    let mut lcp = m;
    for (bits, _) in &entries[1..] {
        let common = (done..done + lcp).take_while(|i| bits[*i] == first[*i]).count();
        lcp = lcp.min(common);
    }
    let label: Vec<bool> = first[done..done + lcp].to_vec();
    store_label(b, &label, m)?;

    let done = done + lcp;
    let m = m - lcp;
    if m == 0 {
        debug_assert_eq!(entries.len(), 1);
        return write_value(b, entries[0].1);
    }

    // Fork on the next bit; sorted input splits contiguously
    let split = entries.partition_point(|(bits, _)| !bits[done]);
    debug_assert!(split > 0 && split < entries.len());
    for part in [&entries[..split], &entries[split..]] {
        let mut child = CellBuilder::new();
        store_node(&mut child, part, done + 1, m - 1, write_value)?;
        b.store_ref(child.build()?)?;
    }
    Ok(())
}
