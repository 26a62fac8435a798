//! ECDSA signatures and the DER codec

use crate::error::{Error, Result};
use num_bigint::{BigInt, Sign};

/// An ECDSA signature pair (r, s).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    r: BigInt,
    s: BigInt,
}

impl Signature {
    pub fn new(r: BigInt, s: BigInt) -> Self {
        Self { r, s }
    }

    pub fn r(&self) -> &BigInt {
        &self.r
    }

    pub fn s(&self) -> &BigInt {
        &self.s
    }

    /// Parse a DER-encoded signature: `30 len 02 Lr R 02 Ls S`.
    pub fn parse_der(data: &[u8]) -> Result<Signature> {
        fn next<'a>(data: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
            if *pos + n > data.len() {
                return Err(Error::MalformedInput("DER signature truncated".to_string()));
            }
            let slice = &data[*pos..*pos + n];
            *pos += n;
            Ok(slice)
        }
        let mut pos = 0usize;

        if next(data, &mut pos, 1)?[0] != 0x30 {
            return Err(Error::MalformedInput("missing DER sequence marker".to_string()));
        }
        let declared = next(data, &mut pos, 1)?[0] as usize;
        if declared != data.len() - 2 {
            return Err(Error::MalformedInput(format!(
                "DER length {} does not match content {}",
                declared,
                data.len() - 2
            )));
        }

        if next(data, &mut pos, 1)?[0] != 0x02 {
            return Err(Error::MalformedInput("missing INTEGER marker for r".to_string()));
        }
        let r_len = next(data, &mut pos, 1)?[0] as usize;
        let r = BigInt::from_bytes_be(Sign::Plus, next(data, &mut pos, r_len)?);

        if next(data, &mut pos, 1)?[0] != 0x02 {
            return Err(Error::MalformedInput("missing INTEGER marker for s".to_string()));
        }
        let s_len = next(data, &mut pos, 1)?[0] as usize;
        let s = BigInt::from_bytes_be(Sign::Plus, next(data, &mut pos, s_len)?);

        if pos != data.len() {
            return Err(Error::MalformedInput("trailing DER bytes".to_string()));
        }

        Ok(Signature { r, s })
    }

    /// Serialize to DER. Each integer is minimally encoded and prefixed
    /// with 0x00 whenever its first content byte has the high bit set.
    pub fn serialize_der(&self) -> Vec<u8> {
        fn der_int(num: &BigInt) -> Vec<u8> {
            let (_, mut bytes) = num.to_bytes_be();
            // minimal encoding: strip leading zeros
            while bytes.len() > 1 && bytes[0] == 0 {
                bytes.remove(0);
            }
            if bytes[0] & 0x80 != 0 {
                bytes.insert(0, 0x00);
            }
            bytes
        }

        let r_bytes = der_int(&self.r);
        let s_bytes = der_int(&self.s);

        let mut out = Vec::with_capacity(6 + r_bytes.len() + s_bytes.len());
        out.push(0x30);
        out.push((4 + r_bytes.len() + s_bytes.len()) as u8);
        out.push(0x02);
        out.push(r_bytes.len() as u8);
        out.extend_from_slice(&r_bytes);
        out.push(0x02);
        out.push(s_bytes.len() as u8);
        out.extend_from_slice(&s_bytes);
        out
    }
}
