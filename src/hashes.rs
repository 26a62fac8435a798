//! Hash primitives: double-SHA256, SHA256+RIPEMD160, MurmurHash3, SipHash-2-4

use crate::error::{Error, Result};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Multiplier for BIP 37 bloom filter seed derivation.
pub const BIP37_CONSTANT: u32 = 0xfba4c795;

/// SIGHASH_ALL signature-hash type.
pub const SIGHASH_ALL: u32 = 1;

/// Double SHA256, used for block ids, transaction ids and wire checksums.
pub fn hash256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// RIPEMD160 of SHA256, used for address hashes.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let ripe = Ripemd160::digest(sha);
    ripe.into()
}

/// MurmurHash3 (x86, 32-bit variant), drives BIP 37 bloom filter bit selection.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let len = data.len();
    let mut h1 = seed;
    let rounded_end = len & !0x03;

    for chunk in data[..rounded_end].chunks_exact(4) {
        let mut k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    // tail, 1-3 trailing bytes
    let mut k1: u32 = 0;
    let tail = len & 0x03;
    if tail == 3 {
        k1 = (data[rounded_end + 2] as u32) << 16;
    }
    if tail >= 2 {
        k1 |= (data[rounded_end + 1] as u32) << 8;
    }
    if tail >= 1 {
        k1 |= data[rounded_end] as u32;
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= len as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;

    h1
}

#[inline]
fn sipround(v: &mut [u64; 4]) {
    v[0] = v[0].wrapping_add(v[1]);
    v[1] = v[1].rotate_left(13);
    v[1] ^= v[0];
    v[0] = v[0].rotate_left(32);
    v[2] = v[2].wrapping_add(v[3]);
    v[3] = v[3].rotate_left(16);
    v[3] ^= v[2];
    v[0] = v[0].wrapping_add(v[3]);
    v[3] = v[3].rotate_left(21);
    v[3] ^= v[0];
    v[2] = v[2].wrapping_add(v[1]);
    v[1] = v[1].rotate_left(17);
    v[1] ^= v[2];
    v[2] = v[2].rotate_left(32);
}

/// SipHash-2-4 with a 128-bit key split into two little-endian words.
///
/// Drives both BIP 158 hash-to-range and BIP 152 short ids.
pub fn siphash24(k0: u64, k1: u64, data: &[u8]) -> u64 {
    let mut v = [
        k0 ^ 0x736f6d6570736575,
        k1 ^ 0x646f72616e646f6d,
        k0 ^ 0x6c7967656e657261,
        k1 ^ 0x7465646279746573,
    ];

    let len = data.len();
    let mut chunks = data.chunks_exact(8);
    for chunk in &mut chunks {
        let m = u64::from_le_bytes([
            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
        ]);
        v[3] ^= m;
        sipround(&mut v);
        sipround(&mut v);
        v[0] ^= m;
    }

    // final word: remaining bytes plus the length in the top byte
    let mut last = [0u8; 8];
    let rem = chunks.remainder();
    last[..rem.len()].copy_from_slice(rem);
    let mut m = u64::from_le_bytes(last);
    m |= (len as u64) << 56;

    v[3] ^= m;
    sipround(&mut v);
    sipround(&mut v);
    v[0] ^= m;

    v[2] ^= 0xff;
    sipround(&mut v);
    sipround(&mut v);
    sipround(&mut v);
    sipround(&mut v);

    v[0] ^ v[1] ^ v[2] ^ v[3]
}

/// Expand packed flag bytes into one-bit-per-byte form, LSB first per byte.
pub fn bytes_to_bit_field(data: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(data.len() * 8);
    for byte in data {
        let mut b = *byte;
        for _ in 0..8 {
            bits.push(b & 1);
            b >>= 1;
        }
    }
    bits
}

/// Pack a one-bit-per-byte field back into bytes. The length must be a
/// multiple of 8.
pub fn bit_field_to_bytes(bit_field: &[u8]) -> Result<Vec<u8>> {
    if bit_field.len() % 8 != 0 {
        return Err(Error::MalformedInput(
            "bit field length not divisible by 8".to_string(),
        ));
    }
    let mut result = vec![0u8; bit_field.len() / 8];
    for (i, bit) in bit_field.iter().enumerate() {
        if *bit != 0 {
            result[i / 8] |= 1 << (i % 8);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_known_value() {
        // double SHA256 of the empty string
        let h = hash256(b"");
        assert_eq!(
            hex::encode(h),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn test_hash160_length() {
        assert_eq!(hash160(b"lightpeer").len(), 20);
    }

    #[test]
    fn test_murmur3_published_vectors() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"", 1), 0x514e28b7);
        assert_eq!(murmur3_32(b"test", 0), 0xba6bd213);
    }

    #[test]
    fn test_siphash24_reference_vectors() {
        // key 000102030405060708090a0b0c0d0e0f from the SipHash paper
        let k0 = u64::from_le_bytes([0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
        let k1 = u64::from_le_bytes([0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f]);
        assert_eq!(siphash24(k0, k1, &[]), 0x726fdb47dd0e0e31);
        assert_eq!(siphash24(k0, k1, &[0x00]), 0x74f839c593dc67fd);
        assert_eq!(siphash24(k0, k1, &[0x00, 0x01]), 0x0d6c8009d9a94f5a);
    }

    #[test]
    fn test_siphash24_deterministic() {
        let a = siphash24(1, 2, b"short id input");
        let b = siphash24(1, 2, b"short id input");
        assert_eq!(a, b);
        assert_ne!(a, siphash24(1, 3, b"short id input"));
    }

    #[test]
    fn test_bit_field_round_trip() {
        let bytes = vec![0xb5, 0x01, 0x00, 0xff];
        let bits = bytes_to_bit_field(&bytes);
        assert_eq!(bits.len(), 32);
        assert_eq!(bit_field_to_bytes(&bits).unwrap(), bytes);
    }

    #[test]
    fn test_bit_field_bad_length() {
        assert!(bit_field_to_bytes(&[1, 0, 1]).is_err());
    }
}
