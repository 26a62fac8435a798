//! Private keys: signing, WIF import/export, address derivation

use crate::base58::{decode_base58check, encode_base58check};
use crate::error::{Error, Result};
use crate::field::mod_inverse;
use crate::point::{to_fixed_32, Point, G, N};
use crate::signature::Signature;
use num_bigint::{BigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::rngs::OsRng;
use rand::RngCore;

const WIF_PREFIX_MAINNET: u8 = 0x80;
const WIF_PREFIX_TESTNET: u8 = 0xef;
const WIF_COMPRESSED_SUFFIX: u8 = 0x01;

/// A secp256k1 private key, an integer in [1, n).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKey {
    secret: BigInt,
}

impl PrivateKey {
    pub fn new(secret: BigInt) -> Result<PrivateKey> {
        if secret < BigInt::one() || secret >= *N {
            return Err(Error::MalformedInput(
                "private key must be in [1, n)".to_string(),
            ));
        }
        Ok(PrivateKey { secret })
    }

    pub fn from_u64(secret: u64) -> PrivateKey {
        PrivateKey {
            secret: BigInt::from(secret),
        }
    }

    pub fn secret(&self) -> &BigInt {
        &self.secret
    }

    pub fn public_key(&self) -> Point {
        G.scalar_mul(&self.secret)
    }

    /// Sign a signature hash with a random nonce k drawn from the CSPRNG.
    pub fn sign(&self, z: &BigInt) -> Result<Signature> {
        let k = random_scalar()?;
        let r_point = G.scalar_mul(&k);
        let r = match r_point.x() {
            Some(x) => x.num().mod_floor(&N),
            None => return Err(Error::SignatureInvalid("nonce produced infinity".to_string())),
        };

        let k_inv = mod_inverse(&k, &N);
        let s = ((z + &r * &self.secret) * k_inv).mod_floor(&N);
        if r.is_zero() || s.is_zero() {
            return Err(Error::SignatureInvalid("degenerate signature".to_string()));
        }
        Ok(Signature::new(r, s))
    }

    /// Sign a 32-byte hash interpreted as a big-endian integer.
    pub fn sign_hash(&self, hash: &[u8; 32]) -> Result<Signature> {
        self.sign(&BigInt::from_bytes_be(Sign::Plus, hash))
    }

    /// Export in Wallet Import Format.
    pub fn wif(&self, compressed: bool, testnet: bool) -> String {
        let mut payload = Vec::with_capacity(34);
        payload.push(if testnet {
            WIF_PREFIX_TESTNET
        } else {
            WIF_PREFIX_MAINNET
        });
        payload.extend_from_slice(&to_fixed_32(&self.secret));
        if compressed {
            payload.push(WIF_COMPRESSED_SUFFIX);
        }
        encode_base58check(&payload)
    }

    /// Import from Wallet Import Format. Returns the key together with the
    /// compressed flag and network the encoding carried.
    pub fn from_wif(wif: &str) -> Result<(PrivateKey, bool, bool)> {
        let payload = decode_base58check(wif)?;
        if payload.len() != 33 && payload.len() != 34 {
            return Err(Error::MalformedInput(format!(
                "WIF payload must be 33 or 34 bytes, got {}",
                payload.len()
            )));
        }

        let testnet = match payload[0] {
            WIF_PREFIX_MAINNET => false,
            WIF_PREFIX_TESTNET => true,
            other => {
                return Err(Error::MalformedInput(format!(
                    "unknown WIF version byte {:#04x}",
                    other
                )))
            }
        };

        let compressed = payload.len() == 34;
        if compressed && payload[33] != WIF_COMPRESSED_SUFFIX {
            return Err(Error::MalformedInput(
                "invalid WIF compression suffix".to_string(),
            ));
        }

        let secret = BigInt::from_bytes_be(Sign::Plus, &payload[1..33]);
        Ok((PrivateKey::new(secret)?, compressed, testnet))
    }

    /// Base58Check P2PKH address for the corresponding public key.
    pub fn address(&self, compressed: bool, testnet: bool) -> String {
        self.public_key().address(compressed, testnet)
    }
}

/// A uniformly random scalar in [1, n).
fn random_scalar() -> Result<BigInt> {
    let mut buf = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| Error::NetworkError(format!("csprng failure: {}", e)))?;
    let mut k = BigInt::from_bytes_be(Sign::Plus, &buf).mod_floor(&N);
    if k.is_zero() {
        k = BigInt::one();
    }
    Ok(k)
}
