//! The `merkleblock` payload: a header plus a partial merkle proof

use crate::envelope::Message;
use crate::error::{Error, Result};
use crate::hashes::bytes_to_bit_field;
use crate::merkle::MerkleTree;
use crate::varint::{encode_varint, read_bytes, read_u32_le, read_varint, read_vec};
use std::io::Read;

/// A filtered block: the 80 header fields, the total transaction count,
/// the included hashes and the flag bits driving tree reconstruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBlock {
    pub version: u32,
    pub prev_block: [u8; 32],
    pub merkle_root: [u8; 32],
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub total: u32,
    pub hashes: Vec<[u8; 32]>,
    pub flag_bytes: Vec<u8>,
}

impl MerkleBlock {
    pub fn parse<R: Read>(r: &mut R) -> Result<MerkleBlock> {
        let version = read_u32_le(r)?;
        let prev_block = read_bytes(r)?;
        let merkle_root = read_bytes(r)?;
        let timestamp = read_u32_le(r)?;
        let bits = read_u32_le(r)?;
        let nonce = read_u32_le(r)?;
        let total = read_u32_le(r)?;

        let num_hashes = read_varint(r)?;
        let mut hashes = Vec::with_capacity(num_hashes as usize);
        for _ in 0..num_hashes {
            hashes.push(read_bytes(r)?);
        }

        let num_flag_bytes = read_varint(r)? as usize;
        let flag_bytes = read_vec(r, num_flag_bytes)?;

        Ok(MerkleBlock {
            version,
            prev_block,
            merkle_root,
            timestamp,
            bits,
            nonce,
            total,
            hashes,
            flag_bytes,
        })
    }

    /// Replay the depth-first flag walk and compare the reconstructed root
    /// with the header's.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// `is_valid` as a validation step with the failure kind.
    pub fn validate(&self) -> Result<()> {
        let mut tree =
            MerkleTree::empty(self.total as usize).map_err(|_| Error::BadMerkleRoot)?;
        let flag_bits = bytes_to_bit_field(&self.flag_bytes);
        tree.populate(&flag_bits, &self.hashes)
            .map_err(|_| Error::BadMerkleRoot)?;
        match tree.root() {
            Some(root) if root == self.merkle_root => Ok(()),
            _ => Err(Error::BadMerkleRoot),
        }
    }
}

impl Message for MerkleBlock {
    fn command(&self) -> &str {
        "merkleblock"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.prev_block);
        out.extend_from_slice(&self.merkle_root);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.bits.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(&self.total.to_le_bytes());
        out.extend_from_slice(&encode_varint(self.hashes.len() as u64));
        for hash in &self.hashes {
            out.extend_from_slice(hash);
        }
        out.extend_from_slice(&encode_varint(self.flag_bytes.len() as u64));
        out.extend_from_slice(&self.flag_bytes);
        Ok(out)
    }
}
