//! Block headers: codec, compact targets, proof of work, difficulty
//! retargeting; full blocks and BIP 158 filter item extraction

use crate::error::{Error, Result};
use crate::hashes::hash256;
use crate::merkle::merkle_root;
use crate::script::OP_RETURN;
use crate::tx::Transaction;
use crate::varint::{encode_varint, read_bytes, read_u32_le, read_varint};
use num_bigint::{BigInt, Sign};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;

/// Maximum target in compact form (difficulty 1).
pub const LOWEST_BITS: u32 = 0x1d00ffff;

/// Difficulty adjustment period in seconds.
pub const TWO_WEEKS: i64 = 60 * 60 * 24 * 14;
const EIGHT_WEEKS: i64 = TWO_WEEKS * 4;
const THREE_HALF_DAYS: i64 = TWO_WEEKS / 4;

/// The 80 serialized bytes of the mainnet genesis header.
pub const MAINNET_GENESIS_HEADER: [u8; 80] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a,
    0xc7, 0x2c, 0x3e, 0x67, 0x76, 0x8f, 0x61, 0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32,
    0x3a, 0x9f, 0xb8, 0xaa, 0x4b, 0x1e, 0x5e, 0x4a, 0x29, 0xab, 0x5f, 0x49, 0xff, 0xff, 0x00,
    0x1d, 0x1d, 0xac, 0x2b, 0x7c,
];

/// The 80 serialized bytes of the testnet genesis header.
pub const TESTNET_GENESIS_HEADER: [u8; 80] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a,
    0xc7, 0x2c, 0x3e, 0x67, 0x76, 0x8f, 0x61, 0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32,
    0x3a, 0x9f, 0xb8, 0xaa, 0x4b, 0x1e, 0x5e, 0x4a, 0xda, 0xe5, 0x49, 0x4d, 0xff, 0xff, 0x00,
    0x1d, 0x1a, 0xa4, 0xae, 0x18,
];

/// An 80-byte block header. The 32-byte fields are kept in wire
/// (little-endian, internal) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block: [u8; 32],
    pub merkle_root: [u8; 32],
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn parse<R: Read>(r: &mut R) -> Result<BlockHeader> {
        Ok(BlockHeader {
            version: read_u32_le(r)?,
            prev_block: read_bytes(r)?,
            merkle_root: read_bytes(r)?,
            timestamp: read_u32_le(r)?,
            bits: read_u32_le(r)?,
            nonce: read_u32_le(r)?,
        })
    }

    pub fn serialize(&self) -> [u8; 80] {
        let mut out = [0u8; 80];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_block);
        out[36..68].copy_from_slice(&self.merkle_root);
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Hash256 of the 80 serialized bytes, internal order.
    pub fn hash(&self) -> [u8; 32] {
        hash256(&self.serialize())
    }

    /// The block id: the hash reversed to display order, hex encoded.
    pub fn id(&self) -> String {
        let mut h = self.hash();
        h.reverse();
        hex::encode(h)
    }

    /// BIP 9 signalling: top three version bits are 001.
    pub fn is_bip9(&self) -> bool {
        self.version >> 29 == 0b001
    }

    /// BIP 91 signalling: version bit 4.
    pub fn is_bip91(&self) -> bool {
        (self.version >> 4) & 1 == 1
    }

    /// BIP 141 (SegWit) signalling: version bit 1.
    pub fn is_bip141(&self) -> bool {
        (self.version >> 1) & 1 == 1
    }

    /// Expand the compact `bits` field: coefficient times 256^(exponent-3).
    pub fn target(&self) -> BigInt {
        bits_to_target(self.bits)
    }

    /// Ratio of the difficulty-1 target to this header's target.
    pub fn difficulty(&self) -> BigInt {
        bits_to_target(LOWEST_BITS) / self.target()
    }

    /// Proof-of-work check: the block id read as a big-endian integer must
    /// be strictly below the target.
    pub fn check_proof_of_work(&self) -> bool {
        let mut h = self.hash();
        h.reverse();
        let proof = BigInt::from_bytes_be(Sign::Plus, &h);
        proof < self.target()
    }

    /// `check_proof_of_work` as a validation step.
    pub fn validate_proof_of_work(&self) -> Result<()> {
        if self.check_proof_of_work() {
            Ok(())
        } else {
            Err(Error::BadProofOfWork)
        }
    }
}

/// Expand a compact target: the high byte is the exponent, the low three
/// bytes the coefficient.
pub fn bits_to_target(bits: u32) -> BigInt {
    let exponent = bits >> 24;
    let coefficient = BigInt::from(bits & 0x00ff_ffff);
    if exponent <= 3 {
        coefficient >> (8 * (3 - exponent))
    } else {
        coefficient << (8 * (exponent - 3))
    }
}

/// Re-encode a target in compact form, prepending 0x00 when the top byte
/// would read as a sign bit.
pub fn target_to_bits(target: &BigInt) -> u32 {
    let (_, mut raw) = target.to_bytes_be();
    if raw == [0] {
        raw.clear();
    }
    if raw.first().is_some_and(|b| *b > 0x7f) {
        raw.insert(0, 0x00);
    }
    let exponent = raw.len() as u32;

    let mut coefficient = 0u32;
    for (i, byte) in raw.iter().take(3).enumerate() {
        coefficient |= (*byte as u32) << (8 * (2 - i));
    }

    (exponent << 24) | coefficient
}

/// New compact target for the period bounded by `first` and `last`,
/// clamping the elapsed time to [3.5 days, 8 weeks] and the result to the
/// maximum target.
pub fn calc_new_bits(first: &BlockHeader, last: &BlockHeader) -> u32 {
    let mut time_diff = last.timestamp as i64 - first.timestamp as i64;
    if time_diff > EIGHT_WEEKS {
        time_diff = EIGHT_WEEKS;
    }
    if time_diff < THREE_HALF_DAYS {
        time_diff = THREE_HALF_DAYS;
    }

    let new_target = last.target() * BigInt::from(time_diff) / BigInt::from(TWO_WEEKS);
    if new_target > bits_to_target(LOWEST_BITS) {
        return LOWEST_BITS;
    }
    target_to_bits(&new_target)
}

/// A full block: header plus ordered transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

impl Block {
    pub fn parse<R: Read>(r: &mut R, testnet: bool) -> Result<Block> {
        let header = BlockHeader::parse(r)?;
        let tx_count = read_varint(r)?;
        let mut txs = Vec::with_capacity(tx_count as usize);
        for _ in 0..tx_count {
            txs.push(Transaction::parse(r, testnet)?);
        }
        Ok(Block { header, txs })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.header.serialize());
        out.extend_from_slice(&encode_varint(self.txs.len() as u64));
        for tx in &self.txs {
            out.extend_from_slice(&tx.serialize());
        }
        out
    }

    /// Transaction ids in block order, display order bytes.
    pub fn tx_hashes(&self) -> Vec<[u8; 32]> {
        self.txs.iter().map(|tx| tx.hash()).collect()
    }

    /// Rebuild the merkle root from the transaction ids and compare with
    /// the header. Leaf hashes enter the tree in internal order.
    pub fn validate_merkle_root(&self) -> bool {
        let leaves: Vec<[u8; 32]> = self
            .tx_hashes()
            .iter()
            .map(|h| {
                let mut internal = *h;
                internal.reverse();
                internal
            })
            .collect();
        match merkle_root(&leaves) {
            Some(root) => root == self.header.merkle_root,
            None => false,
        }
    }

    /// Collect the BIP 158 basic-filter items for this block: the supplied
    /// previous-output scripts plus every output script that is non-empty
    /// and not OP_RETURN, deduplicated and sorted.
    pub fn basic_filter_items(&self, prev_output_scripts: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let mut items: Vec<Vec<u8>> = Vec::new();

        for script in prev_output_scripts {
            if !script.is_empty() {
                items.push(script.clone());
            }
        }

        for tx in &self.txs {
            for output in &tx.outputs {
                let raw = &output.raw_script;
                if raw.is_empty() || raw[0] == OP_RETURN {
                    continue;
                }
                items.push(raw.clone());
            }
        }

        let mut seen = HashSet::new();
        let mut unique: Vec<Vec<u8>> = items
            .into_iter()
            .filter(|item| seen.insert(item.clone()))
            .collect();
        unique.sort();
        unique
    }
}
