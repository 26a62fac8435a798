//! Bech32 segregated-witness addresses (BIP 173)

use crate::error::{Error, Result};

const CHARSET: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const GENERATOR: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];

/// Human-readable part for mainnet segwit addresses.
pub const HRP_MAINNET: &str = "bc";
/// Human-readable part for testnet segwit addresses.
pub const HRP_TESTNET: &str = "tb";

fn polymod(values: &[u8]) -> u32 {
    let mut chk: u32 = 1;
    for v in values {
        let top = chk >> 25;
        chk = (chk & 0x1ff_ffff) << 5 ^ *v as u32;
        for (i, g) in GENERATOR.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= g;
            }
        }
    }
    chk
}

fn hrp_expand(hrp: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(hrp.len() * 2 + 1);
    for c in hrp.bytes() {
        out.push(c >> 5);
    }
    out.push(0);
    for c in hrp.bytes() {
        out.push(c & 31);
    }
    out
}

fn create_checksum(hrp: &str, data: &[u8]) -> [u8; 6] {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    values.extend_from_slice(&[0; 6]);
    let m = polymod(&values) ^ 1;
    let mut out = [0u8; 6];
    for (p, slot) in out.iter_mut().enumerate() {
        *slot = ((m >> (5 * (5 - p))) & 31) as u8;
    }
    out
}

fn verify_checksum(hrp: &str, data: &[u8]) -> bool {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    polymod(&values) == 1
}

/// Regroup the bits of `data` from `from`-bit symbols into `to`-bit symbols.
fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Result<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let maxv: u32 = (1 << to) - 1;
    let mut out = Vec::new();

    for (idx, value) in data.iter().enumerate() {
        let v = *value as u32;
        if v >> from != 0 {
            return Err(Error::MalformedInput(format!(
                "value {} at index {} exceeds {} bits",
                v, idx, from
            )));
        }
        acc = (acc << from) | v;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & maxv) as u8);
        }
    }

    if pad {
        if bits > 0 {
            out.push(((acc << (to - bits)) & maxv) as u8);
        }
    } else if bits >= from {
        return Err(Error::MalformedInput("illegal zero padding".to_string()));
    } else if (acc << (to - bits)) & maxv != 0 {
        return Err(Error::MalformedInput("non-zero padding".to_string()));
    }

    Ok(out)
}

/// Encode a version-0 witness program as a Bech32 address.
///
/// The program must be 20 bytes (P2WPKH) or 32 bytes (P2WSH).
pub fn encode_segwit_address(hrp: &str, witness_version: u8, program: &[u8]) -> Result<String> {
    if witness_version != 0 {
        return Err(Error::MalformedInput(format!(
            "unsupported witness version {}",
            witness_version
        )));
    }
    if program.len() != 20 && program.len() != 32 {
        return Err(Error::MalformedInput(format!(
            "witness program must be 20 or 32 bytes, got {}",
            program.len()
        )));
    }

    let mut data = vec![witness_version];
    data.extend(convert_bits(program, 8, 5, true)?);
    let checksum = create_checksum(hrp, &data);
    data.extend_from_slice(&checksum);

    let mut out = String::with_capacity(hrp.len() + 1 + data.len());
    out.push_str(hrp);
    out.push('1');
    for d in data {
        out.push(CHARSET[d as usize] as char);
    }
    Ok(out)
}

/// Decode a Bech32 segwit address to `(hrp, witness_version, program)`.
pub fn decode_segwit_address(addr: &str) -> Result<(String, u8, Vec<u8>)> {
    let addr = addr.to_lowercase();
    let sep = addr
        .rfind('1')
        .ok_or_else(|| Error::MalformedInput("missing bech32 separator".to_string()))?;
    if sep == 0 || sep + 7 > addr.len() {
        return Err(Error::MalformedInput("bad bech32 layout".to_string()));
    }
    let hrp = &addr[..sep];

    let mut data = Vec::with_capacity(addr.len() - sep - 1);
    for c in addr[sep + 1..].bytes() {
        let index = CHARSET
            .iter()
            .position(|a| *a == c)
            .ok_or_else(|| Error::MalformedInput(format!("invalid bech32 character: {}", c as char)))?;
        data.push(index as u8);
    }

    if !verify_checksum(hrp, &data) {
        return Err(Error::ChecksumMismatch("bech32 checksum".to_string()));
    }

    let payload = &data[..data.len() - 6];
    if payload.is_empty() {
        return Err(Error::MalformedInput("empty witness payload".to_string()));
    }
    let version = payload[0];
    let program = convert_bits(&payload[1..], 5, 8, false)?;
    if version != 0 {
        return Err(Error::MalformedInput(format!(
            "unsupported witness version {}",
            version
        )));
    }
    if program.len() != 20 && program.len() != 32 {
        return Err(Error::MalformedInput(format!(
            "witness program must be 20 or 32 bytes, got {}",
            program.len()
        )));
    }

    Ok((hrp.to_string(), version, program))
}
