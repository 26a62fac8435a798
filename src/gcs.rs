//! BIP 158 compact block filters: Golomb-Coded Sets keyed by SipHash-2-4

use crate::bitstream::{BitReader, BitWriter};
use crate::error::{Error, Result};
use crate::hashes::siphash24;
use crate::varint::{encode_varint, read_varint};
use std::io::Read;

/// Golomb-Rice parameter for the basic filter.
pub const GCS_P: u32 = 19;
/// Hash-range multiplier for the basic filter.
pub const GCS_M: u64 = 784_931;

/// A Golomb-coded set: `n` items hashed into [0, n*m), sorted,
/// delta-encoded and Golomb-encoded with parameter `p`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GolombCodedSet {
    num_items: u64,
    p: u32,
    m: u64,
    data: Vec<u8>,
}

impl GolombCodedSet {
    /// Build a basic filter over the given items with the SipHash key
    /// `(k0, k1)`.
    pub fn new(items: &[Vec<u8>], k0: u64, k1: u64) -> Result<GolombCodedSet> {
        let n = items.len() as u64;

        let mut hashed = Vec::with_capacity(items.len());
        for item in items {
            hashed.push(hash_to_range(item, n, GCS_M, k0, k1)?);
        }
        hashed.sort_unstable();

        let mut writer = BitWriter::new();
        let mut last = 0u64;
        for value in hashed {
            golomb_encode(&mut writer, value - last, GCS_P);
            last = value;
        }

        Ok(GolombCodedSet {
            num_items: n,
            p: GCS_P,
            m: GCS_M,
            data: writer.into_bytes(),
        })
    }

    /// Reconstruct a filter from its wire form: varint(n) followed by the
    /// encoded data.
    pub fn parse<R: Read>(r: &mut R) -> Result<GolombCodedSet> {
        let num_items = read_varint(r)?;
        let mut data = Vec::new();
        r.read_to_end(&mut data)?;
        Ok(GolombCodedSet {
            num_items,
            p: GCS_P,
            m: GCS_M,
            data,
        })
    }

    pub fn num_items(&self) -> u64 {
        self.num_items
    }

    /// Probabilistic membership for a single item. An empty filter matches
    /// nothing.
    pub fn contains(&self, item: &[u8], k0: u64, k1: u64) -> Result<bool> {
        if self.num_items == 0 {
            return Ok(false);
        }
        let target = hash_to_range(item, self.num_items, self.m, k0, k1)?;

        let mut reader = BitReader::new(&self.data);
        let mut current = 0u64;
        for _ in 0..self.num_items {
            current += golomb_decode(&mut reader, self.p)?;
            if current == target {
                return Ok(true);
            }
            if current > target {
                return Ok(false);
            }
        }
        Ok(false)
    }

    /// Whether any of the items may be in the filter.
    pub fn contains_any(&self, items: &[Vec<u8>], k0: u64, k1: u64) -> Result<bool> {
        for item in items {
            if self.contains(item, k0, k1)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Wire form: varint(n) followed by the encoded data.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = encode_varint(self.num_items);
        out.extend_from_slice(&self.data);
        out
    }
}

/// SipHash key for a block's filter: the first 16 bytes of the block hash
/// in internal order, as two little-endian words.
pub fn filter_key(block_hash: &[u8; 32]) -> (u64, u64) {
    let k0 = u64::from_le_bytes(block_hash[0..8].try_into().expect("slice is 8 bytes"));
    let k1 = u64::from_le_bytes(block_hash[8..16].try_into().expect("slice is 8 bytes"));
    (k0, k1)
}

/// Map an item into [0, n*m) by SipHash followed by multiply-and-shift
/// reduction. Both n and m must stay below 2^32 so the range fits 64 bits.
fn hash_to_range(item: &[u8], n: u64, m: u64, k0: u64, k1: u64) -> Result<u64> {
    if n >= 1 << 32 {
        return Err(Error::MalformedInput(format!("filter size {} exceeds 2^32", n)));
    }
    if m >= 1 << 32 {
        return Err(Error::MalformedInput(format!("range multiplier {} exceeds 2^32", m)));
    }
    if n == 0 {
        return Ok(0);
    }
    let hash = siphash24(k0, k1, item);
    Ok(fast_reduction(hash, n * m))
}

/// The upper 64 bits of the full 128-bit product `v * n`, mapping `v`
/// uniformly into [0, n) without a modulo.
fn fast_reduction(v: u64, n: u64) -> u64 {
    ((v as u128 * n as u128) >> 64) as u64
}

/// Golomb-Rice encode one delta: the quotient in unary (ones then a
/// zero), then the low `p` bits of the remainder, MSB first.
fn golomb_encode(writer: &mut BitWriter, value: u64, p: u32) {
    let mut quotient = value >> p;
    while quotient > 0 {
        writer.write_bit(true);
        quotient -= 1;
    }
    writer.write_bit(false);
    writer.write_bits_be(value, p as usize);
}

/// Inverse of [`golomb_encode`].
fn golomb_decode(reader: &mut BitReader, p: u32) -> Result<u64> {
    let mut quotient = 0u64;
    while reader.read_bit()? == 1 {
        quotient += 1;
    }
    let remainder = reader.read_bits_be(p as usize)?;
    Ok((quotient << p) | remainder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::{BitReader, BitWriter};

    #[test]
    fn test_golomb_round_trip() {
        for value in [0u64, 1, 100, 524_287, 524_288, 10_000_000] {
            let mut writer = BitWriter::new();
            golomb_encode(&mut writer, value, GCS_P);
            let bytes = writer.into_bytes();
            let mut reader = BitReader::new(&bytes);
            assert_eq!(golomb_decode(&mut reader, GCS_P).unwrap(), value);
        }
    }

    #[test]
    fn test_fast_reduction_range() {
        for v in [0u64, 1, u64::MAX / 2, u64::MAX] {
            let n = 100u64 * GCS_M;
            assert!(fast_reduction(v, n) < n);
        }
        assert_eq!(fast_reduction(u64::MAX, 1), 0);
    }

    #[test]
    fn test_no_false_negatives() {
        let items: Vec<Vec<u8>> = (0..50u8).map(|i| vec![i, i.wrapping_mul(3), 0x55]).collect();
        let gcs = GolombCodedSet::new(&items, 7, 11).unwrap();
        for item in &items {
            assert!(gcs.contains(item, 7, 11).unwrap());
        }
    }

    #[test]
    fn test_match_any() {
        let items = vec![b"alpha".to_vec(), b"beta".to_vec()];
        let gcs = GolombCodedSet::new(&items, 1, 2).unwrap();
        assert!(gcs.contains_any(&[b"beta".to_vec()], 1, 2).unwrap());
        assert!(!gcs
            .contains_any(&[], 1, 2)
            .unwrap());
    }

    #[test]
    fn test_empty_filter_serializes_to_zero_byte() {
        let gcs = GolombCodedSet::new(&[], 0, 0).unwrap();
        assert_eq!(gcs.serialize(), vec![0x00]);
        assert!(!gcs.contains(b"anything", 0, 0).unwrap());
    }

    #[test]
    fn test_serialize_parse_round_trip() {
        let items = vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()];
        let gcs = GolombCodedSet::new(&items, 3, 4).unwrap();
        let wire = gcs.serialize();
        let parsed = GolombCodedSet::parse(&mut wire.as_slice()).unwrap();
        assert_eq!(parsed, gcs);
        assert!(parsed.contains(b"two", 3, 4).unwrap());
    }

    #[test]
    fn test_filter_key_split() {
        let mut hash = [0u8; 32];
        hash[0] = 0x01;
        hash[8] = 0x02;
        let (k0, k1) = filter_key(&hash);
        assert_eq!(k0, 1);
        assert_eq!(k1, 2);
    }

    #[test]
    fn test_truncated_data_errors() {
        let items = vec![b"item-a".to_vec(), b"item-b".to_vec()];
        let gcs = GolombCodedSet::new(&items, 9, 9).unwrap();
        let mut wire = gcs.serialize();
        wire.truncate(wire.len() - 1);
        let parsed = GolombCodedSet::parse(&mut wire.as_slice()).unwrap();
        // membership for an absent item must now hit the stream end
        let result = parsed.contains(b"missing-item", 9, 9);
        assert!(result.is_err() || !result.unwrap());
    }
}
