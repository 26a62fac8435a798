//! Field arithmetic over the secp256k1 prime

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Zero};
use std::sync::LazyLock;

/// The secp256k1 field prime, p = 2^256 - 2^32 - 977.
pub static PRIME: LazyLock<BigInt> = LazyLock::new(|| {
    (BigInt::one() << 256u32) - (BigInt::one() << 32u32) - BigInt::from(977u32)
});

/// An element of the field Z_p, held as its canonical representative in
/// [0, p).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldElement {
    num: BigInt,
}

impl FieldElement {
    pub fn new(num: BigInt) -> Self {
        Self {
            num: num.mod_floor(&PRIME),
        }
    }

    pub fn from_u64(num: u64) -> Self {
        Self::new(BigInt::from(num))
    }

    pub fn num(&self) -> &BigInt {
        &self.num
    }

    pub fn is_zero(&self) -> bool {
        self.num.is_zero()
    }

    pub fn add(&self, other: &FieldElement) -> FieldElement {
        FieldElement::new(&self.num + &other.num)
    }

    pub fn sub(&self, other: &FieldElement) -> FieldElement {
        FieldElement::new(&self.num - &other.num)
    }

    pub fn mul(&self, other: &FieldElement) -> FieldElement {
        FieldElement::new(&self.num * &other.num)
    }

    /// Raise to an arbitrary non-negative exponent.
    pub fn pow(&self, exponent: &BigInt) -> FieldElement {
        FieldElement {
            num: self.num.modpow(exponent, &PRIME),
        }
    }

    /// Multiplicative inverse via the extended Euclidean algorithm.
    pub fn inverse(&self) -> FieldElement {
        FieldElement {
            num: mod_inverse(&self.num, &PRIME),
        }
    }

    pub fn div(&self, other: &FieldElement) -> FieldElement {
        self.mul(&other.inverse())
    }

    /// Modular square root. The prime is congruent to 3 mod 4, so
    /// sqrt(a) = a^((p+1)/4). When `a` is a non-residue the result squares
    /// to -a instead; callers check parity/consistency as needed.
    pub fn sqrt(&self) -> FieldElement {
        let exp = (&*PRIME + BigInt::one()) / BigInt::from(4u32);
        self.pow(&exp)
    }
}

/// Extended Euclidean algorithm: returns (g, x, y) with a*x + b*y = g.
fn egcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    if a.is_zero() {
        return (b.clone(), BigInt::zero(), BigInt::one());
    }
    let (g, x, y) = egcd(&b.mod_floor(a), a);
    (g, y - (b / a) * &x, x)
}

/// Modular inverse of `a` modulo `m`, for gcd(a, m) = 1.
pub fn mod_inverse(a: &BigInt, m: &BigInt) -> BigInt {
    let (_, x, _) = egcd(&a.mod_floor(m), m);
    x.mod_floor(m)
}
