//! BIP 37 bloom filters and the `filterload` payload

use crate::envelope::Message;
use crate::error::Result;
use crate::hashes::{bit_field_to_bytes, murmur3_32, BIP37_CONSTANT};
use crate::varint::encode_varint;

/// Instructs the remote peer to add all matched outpoints to the filter.
pub const BLOOM_UPDATE_ALL: u8 = 0;

/// A BIP 37 bloom filter over `size * 8` bits.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    pub size: u32,
    bit_field: Vec<u8>,
    pub function_count: u32,
    pub tweak: u32,
}

impl BloomFilter {
    pub fn new(size: u32, function_count: u32, tweak: u32) -> Self {
        Self {
            size,
            bit_field: vec![0u8; (size * 8) as usize],
            function_count,
            tweak,
        }
    }

    /// Set the filter bits for an item: one MurmurHash3 per function with
    /// the BIP 37 seed schedule.
    pub fn add(&mut self, item: &[u8]) {
        for i in 0..self.function_count {
            let seed = i.wrapping_mul(BIP37_CONSTANT).wrapping_add(self.tweak);
            let h = murmur3_32(item, seed);
            let bit = (h % (self.size * 8)) as usize;
            self.bit_field[bit] = 1;
        }
    }

    /// Whether every bit for the item is set (true means "maybe present").
    pub fn contains(&self, item: &[u8]) -> bool {
        (0..self.function_count).all(|i| {
            let seed = i.wrapping_mul(BIP37_CONSTANT).wrapping_add(self.tweak);
            let h = murmur3_32(item, seed);
            self.bit_field[(h % (self.size * 8)) as usize] != 0
        })
    }

    /// The packed filter bytes.
    pub fn filter_bytes(&self) -> Result<Vec<u8>> {
        bit_field_to_bytes(&self.bit_field)
    }

    /// Wrap the filter in a `filterload` payload.
    pub fn filterload(&self, flag: u8) -> FilterLoadMessage {
        FilterLoadMessage {
            filter: self.clone(),
            flag,
        }
    }
}

/// The `filterload` message: size, packed bits, function count, tweak,
/// update flag.
#[derive(Debug, Clone)]
pub struct FilterLoadMessage {
    pub filter: BloomFilter,
    pub flag: u8,
}

impl Message for FilterLoadMessage {
    fn command(&self) -> &str {
        "filterload"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = encode_varint(self.filter.size as u64);
        out.extend_from_slice(&self.filter.filter_bytes()?);
        out.extend_from_slice(&self.filter.function_count.to_le_bytes());
        out.extend_from_slice(&self.filter.tweak.to_le_bytes());
        out.push(self.flag);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_added_item_matches() {
        let mut filter = BloomFilter::new(10, 5, 99);
        filter.add(b"Hello World");
        assert!(filter.contains(b"Hello World"));
    }

    #[test]
    fn test_missing_item_usually_absent() {
        let mut filter = BloomFilter::new(32, 5, 99);
        filter.add(b"Hello World");
        assert!(!filter.contains(b"Goodbye!"));
    }

    #[test]
    fn test_add_sets_bounded_bits() {
        let mut filter = BloomFilter::new(10, 5, 99);
        filter.add(b"item");
        let set: usize = filter.bit_field.iter().map(|b| *b as usize).sum();
        assert!(set >= 1 && set <= 5);
    }

    #[test]
    fn test_filterload_layout() {
        let mut filter = BloomFilter::new(10, 5, 99);
        filter.add(b"Hello World");
        let msg = filter.filterload(BLOOM_UPDATE_ALL);
        assert_eq!(msg.command(), "filterload");

        let payload = msg.serialize().unwrap();
        // varint(10) + 10 filter bytes + function count + tweak + flag
        assert_eq!(payload.len(), 1 + 10 + 4 + 4 + 1);
        assert_eq!(payload[0], 10);
        assert_eq!(&payload[11..15], &5u32.to_le_bytes());
        assert_eq!(&payload[15..19], &99u32.to_le_bytes());
        assert_eq!(payload[19], BLOOM_UPDATE_ALL);
    }

    #[test]
    fn test_deterministic_across_instances() {
        let mut a = BloomFilter::new(16, 4, 7);
        let mut b = BloomFilter::new(16, 4, 7);
        a.add(b"tx-hash");
        b.add(b"tx-hash");
        assert_eq!(a.filter_bytes().unwrap(), b.filter_bytes().unwrap());
    }
}
