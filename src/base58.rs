//! Base58 and Base58Check codecs

use crate::error::{Error, Result};
use crate::hashes::hash256;
use num_bigint::BigUint;
use num_traits::Zero;

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Encode bytes in the Bitcoin Base58 alphabet. Leading zero bytes become
/// leading '1' characters.
pub fn encode_base58(data: &[u8]) -> String {
    let leading_zeros = data.iter().take_while(|b| **b == 0).count();

    let mut num = BigUint::from_bytes_be(data);
    let fifty_eight = BigUint::from(58u32);
    let mut digits = Vec::new();
    while !num.is_zero() {
        let rem = (&num % &fifty_eight)
            .to_u32_digits()
            .first()
            .copied()
            .unwrap_or(0);
        digits.push(BASE58_ALPHABET[rem as usize]);
        num /= &fifty_eight;
    }

    let mut out = vec![b'1'; leading_zeros];
    digits.reverse();
    out.extend_from_slice(&digits);
    String::from_utf8(out).expect("alphabet is ascii")
}

/// Encode bytes with the 4-byte Hash256 checksum appended.
pub fn encode_base58check(data: &[u8]) -> String {
    let checksum = hash256(data);
    let mut payload = data.to_vec();
    payload.extend_from_slice(&checksum[..4]);
    encode_base58(&payload)
}

fn alphabet_index(c: u8) -> Option<u64> {
    BASE58_ALPHABET.iter().position(|a| *a == c).map(|i| i as u64)
}

/// Decode a Base58Check string, verifying and stripping the checksum.
/// Returns the full payload including any version byte.
pub fn decode_base58check(s: &str) -> Result<Vec<u8>> {
    let leading_ones = s.bytes().take_while(|c| *c == b'1').count();

    let mut num = BigUint::zero();
    let fifty_eight = BigUint::from(58u32);
    for c in s.bytes() {
        let index = alphabet_index(c)
            .ok_or_else(|| Error::MalformedInput(format!("invalid base58 character: {}", c as char)))?;
        num = num * &fifty_eight + BigUint::from(index);
    }

    let mut combined = vec![0u8; leading_ones];
    if !num.is_zero() {
        combined.extend_from_slice(&num.to_bytes_be());
    }

    if combined.len() < 4 {
        return Err(Error::MalformedInput("base58check data too short".to_string()));
    }
    let (payload, checksum) = combined.split_at(combined.len() - 4);
    let expected = hash256(payload);
    if checksum != &expected[..4] {
        return Err(Error::ChecksumMismatch(format!(
            "base58check: got {}, expected {}",
            hex::encode(checksum),
            hex::encode(&expected[..4])
        )));
    }
    Ok(payload.to_vec())
}
