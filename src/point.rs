//! The secp256k1 group: affine points, scalar multiplication, SEC codec,
//! ECDSA verification

use crate::base58::encode_base58check;
use crate::error::{Error, Result};
use crate::field::{mod_inverse, FieldElement, PRIME};
use crate::hashes::hash160;
use crate::signature::Signature;
use num_bigint::{BigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use std::sync::LazyLock;

/// Order of the generator subgroup.
pub static N: LazyLock<BigInt> = LazyLock::new(|| {
    BigInt::parse_bytes(
        b"fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141",
        16,
    )
    .expect("valid hex constant")
});

/// The fixed generator point G.
pub static G: LazyLock<Point> = LazyLock::new(|| {
    let gx = BigInt::parse_bytes(
        b"79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        16,
    )
    .expect("valid hex constant");
    let gy = BigInt::parse_bytes(
        b"483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8",
        16,
    )
    .expect("valid hex constant");
    Point::new(gx, gy).expect("generator is on the curve")
});

/// A point on y^2 = x^3 + 7 over the secp256k1 field, or the group identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    coords: Option<(FieldElement, FieldElement)>,
}

impl Point {
    /// Construct an affine point, rejecting coordinates off the curve.
    pub fn new(x: BigInt, y: BigInt) -> Result<Point> {
        let x = FieldElement::new(x);
        let y = FieldElement::new(y);
        let lhs = y.mul(&y);
        let rhs = x.mul(&x).mul(&x).add(&FieldElement::from_u64(7));
        if lhs != rhs {
            return Err(Error::CurveViolation(format!(
                "({:x}, {:x})",
                x.num(),
                y.num()
            )));
        }
        Ok(Point {
            coords: Some((x, y)),
        })
    }

    pub fn infinity() -> Point {
        Point { coords: None }
    }

    pub fn is_infinity(&self) -> bool {
        self.coords.is_none()
    }

    pub fn x(&self) -> Option<&FieldElement> {
        self.coords.as_ref().map(|(x, _)| x)
    }

    pub fn y(&self) -> Option<&FieldElement> {
        self.coords.as_ref().map(|(_, y)| y)
    }

    /// Group addition with the three affine cases: identity, vertical line,
    /// and point doubling.
    pub fn add(&self, other: &Point) -> Point {
        let (x1, y1) = match &self.coords {
            None => return other.clone(),
            Some(c) => c,
        };
        let (x2, y2) = match &other.coords {
            None => return self.clone(),
            Some(c) => c,
        };

        if x1 == x2 {
            if y1 != y2 {
                // vertical line
                return Point::infinity();
            }
            return self.double();
        }

        let slope = y2.sub(y1).div(&x2.sub(x1));
        let x3 = slope.mul(&slope).sub(x1).sub(x2);
        let y3 = slope.mul(&x1.sub(&x3)).sub(y1);
        Point {
            coords: Some((x3, y3)),
        }
    }

    fn double(&self) -> Point {
        let (x1, y1) = match &self.coords {
            None => return Point::infinity(),
            Some(c) => c,
        };
        if y1.is_zero() {
            // vertical tangent
            return Point::infinity();
        }

        let three_x_sq = x1.mul(x1).mul(&FieldElement::from_u64(3));
        let slope = three_x_sq.div(&y1.mul(&FieldElement::from_u64(2)));
        let x3 = slope.mul(&slope).sub(x1).sub(x1);
        let y3 = slope.mul(&x1.sub(&x3)).sub(y1);
        Point {
            coords: Some((x3, y3)),
        }
    }

    /// Scalar multiplication by binary double-and-add. The coefficient is
    /// reduced modulo the group order first.
    pub fn scalar_mul(&self, coefficient: &BigInt) -> Point {
        let mut coef = coefficient.mod_floor(&N);
        let mut current = self.clone();
        let mut result = Point::infinity();
        while !coef.is_zero() {
            if coef.bit(0) {
                result = result.add(&current);
            }
            current = current.add(&current);
            coef >>= 1u32;
        }
        result
    }

    /// ECDSA verification against a signature hash.
    ///
    /// Rejects r or s outside [1, n); accepts iff (u*G + v*P).x mod n == r
    /// with u = z/s and v = r/s.
    pub fn verify(&self, z: &BigInt, sig: &Signature) -> bool {
        let one = BigInt::one();
        if sig.r() < &one || sig.r() >= &*N || sig.s() < &one || sig.s() >= &*N {
            return false;
        }

        let s_inv = mod_inverse(sig.s(), &N);
        let u = (z * &s_inv).mod_floor(&N);
        let v = (sig.r() * &s_inv).mod_floor(&N);

        let total = G.scalar_mul(&u).add(&self.scalar_mul(&v));
        match total.x() {
            Some(x) => x.num().mod_floor(&N) == *sig.r(),
            None => false,
        }
    }

    /// Serialize in SEC format: 33 bytes compressed (parity prefix), 65
    /// bytes uncompressed (0x04 prefix).
    pub fn serialize_sec(&self, compressed: bool) -> Vec<u8> {
        let (x, y) = self
            .coords
            .as_ref()
            .expect("cannot serialize the point at infinity");
        let x_bytes = to_fixed_32(x.num());
        if compressed {
            let mut out = Vec::with_capacity(33);
            out.push(if y.num().is_even() { 0x02 } else { 0x03 });
            out.extend_from_slice(&x_bytes);
            out
        } else {
            let mut out = Vec::with_capacity(65);
            out.push(0x04);
            out.extend_from_slice(&x_bytes);
            out.extend_from_slice(&to_fixed_32(y.num()));
            out
        }
    }

    /// Parse a SEC-encoded point, reconstructing y from x for the
    /// compressed forms by solving y^2 = x^3 + 7 and picking the root of
    /// the requested parity.
    pub fn parse_sec(data: &[u8]) -> Result<Point> {
        match data.first() {
            Some(0x04) => {
                if data.len() != 65 {
                    return Err(Error::MalformedInput(format!(
                        "uncompressed SEC must be 65 bytes, got {}",
                        data.len()
                    )));
                }
                let x = BigInt::from_bytes_be(Sign::Plus, &data[1..33]);
                let y = BigInt::from_bytes_be(Sign::Plus, &data[33..65]);
                Point::new(x, y)
            }
            Some(prefix @ (0x02 | 0x03)) => {
                if data.len() != 33 {
                    return Err(Error::MalformedInput(format!(
                        "compressed SEC must be 33 bytes, got {}",
                        data.len()
                    )));
                }
                let want_even = *prefix == 0x02;
                let x = FieldElement::new(BigInt::from_bytes_be(Sign::Plus, &data[1..33]));
                let y_squared = x.mul(&x).mul(&x).add(&FieldElement::from_u64(7));
                let mut y = y_squared.sqrt();
                if y.num().is_even() != want_even {
                    y = FieldElement::new(&*PRIME - y.num());
                }
                Point::new(x.num().clone(), y.num().clone())
            }
            Some(p) => Err(Error::MalformedInput(format!("invalid SEC prefix {:#04x}", p))),
            None => Err(Error::MalformedInput("empty SEC data".to_string())),
        }
    }

    /// Base58Check P2PKH address for this public key.
    pub fn address(&self, compressed: bool, testnet: bool) -> String {
        let h160 = hash160(&self.serialize_sec(compressed));
        let prefix = if testnet { 0x6f } else { 0x00 };
        let mut payload = vec![prefix];
        payload.extend_from_slice(&h160);
        encode_base58check(&payload)
    }
}

/// Big-endian, left-padded 32-byte form of a non-negative integer.
pub(crate) fn to_fixed_32(num: &BigInt) -> [u8; 32] {
    let (_, bytes) = num.to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    out
}
