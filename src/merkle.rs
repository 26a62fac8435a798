//! Merkle trees: full construction and partial reconstruction from a
//! merkleblock's flag bits

use crate::error::{Error, Result};
use crate::hashes::hash256;

/// Hash256 of the two child hashes concatenated.
pub fn merkle_parent(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(left);
    combined[32..].copy_from_slice(right);
    hash256(&combined)
}

/// Parent level of a list of hashes. An odd level duplicates its last node
/// before pairing.
pub fn merkle_parent_level(hashes: &[[u8; 32]]) -> Vec<[u8; 32]> {
    let mut level = hashes.to_vec();
    if level.len() % 2 != 0 {
        let last = *level.last().expect("level is non-empty");
        level.push(last);
    }
    level
        .chunks_exact(2)
        .map(|pair| merkle_parent(&pair[0], &pair[1]))
        .collect()
}

/// Root of a full tree. Undefined (None) for an empty list.
pub fn merkle_root(hashes: &[[u8; 32]]) -> Option<[u8; 32]> {
    if hashes.is_empty() {
        return None;
    }
    let mut current = hashes.to_vec();
    while current.len() > 1 {
        current = merkle_parent_level(&current);
    }
    Some(current[0])
}

fn log2_ceil(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        ((n - 1).ilog2() + 1) as usize
    }
}

/// A merkle tree with a navigation cursor, as used to replay a
/// merkleblock's depth-first flag walk. Level 0 is the root; level
/// `max_depth` holds the leaves.
pub struct MerkleTree {
    total: usize,
    max_depth: usize,
    nodes: Vec<Vec<Option<[u8; 32]>>>,
    current_depth: usize,
    current_index: usize,
}

impl MerkleTree {
    /// An unpopulated tree shaped for `total` leaves.
    pub fn empty(total: usize) -> Result<MerkleTree> {
        if total == 0 {
            return Err(Error::MalformedInput(
                "merkle tree needs at least one leaf".to_string(),
            ));
        }
        let max_depth = log2_ceil(total);
        let mut nodes = Vec::with_capacity(max_depth + 1);
        for depth in 0..=max_depth {
            let num_items = total.div_ceil(1 << (max_depth - depth));
            nodes.push(vec![None; num_items]);
        }
        Ok(MerkleTree {
            total,
            max_depth,
            nodes,
            current_depth: 0,
            current_index: 0,
        })
    }

    /// A fully-built tree over the given leaf hashes.
    pub fn build(leaves: &[[u8; 32]]) -> Result<MerkleTree> {
        let mut tree = MerkleTree::empty(leaves.len())?;
        let mut level: Vec<[u8; 32]> = leaves.to_vec();
        for depth in (0..=tree.max_depth).rev() {
            tree.nodes[depth] = level.iter().map(|h| Some(*h)).collect();
            if depth > 0 {
                level = merkle_parent_level(&level);
            }
        }
        Ok(tree)
    }

    pub fn root(&self) -> Option<[u8; 32]> {
        self.nodes[0][0]
    }

    pub fn is_leaf(&self) -> bool {
        self.current_depth == self.max_depth
    }

    pub fn up(&mut self) {
        if self.current_depth == 0 {
            return;
        }
        self.current_depth -= 1;
        self.current_index /= 2;
    }

    pub fn left(&mut self) {
        if self.is_leaf() {
            return;
        }
        self.current_depth += 1;
        self.current_index *= 2;
    }

    pub fn right(&mut self) {
        if self.is_leaf() || !self.right_exists() {
            return;
        }
        self.current_depth += 1;
        self.current_index = self.current_index * 2 + 1;
    }

    pub fn right_exists(&self) -> bool {
        self.nodes[self.current_depth + 1].len() > self.current_index * 2 + 1
    }

    fn set_current(&mut self, value: [u8; 32]) {
        self.nodes[self.current_depth][self.current_index] = Some(value);
    }

    /// Fill the tree from a merkleblock's flag bits and hash list.
    ///
    /// At each node one flag bit is read; a leaf or a zero bit consumes the
    /// next provided hash, while a one bit descends into both children.
    /// Unused hashes are an error; unused trailing flag bits are tolerated.
    pub fn populate(&mut self, flag_bits: &[u8], hashes: &[[u8; 32]]) -> Result<()> {
        let mut flag_index = 0usize;
        let mut hash_index = 0usize;
        self.current_depth = 0;
        self.current_index = 0;
        self.traverse(flag_bits, hashes, &mut flag_index, &mut hash_index)?;

        if hash_index != hashes.len() {
            return Err(Error::MalformedInput(format!(
                "merkleblock left {} hashes unused",
                hashes.len() - hash_index
            )));
        }
        Ok(())
    }

    fn traverse(
        &mut self,
        flag_bits: &[u8],
        hashes: &[[u8; 32]],
        flag_index: &mut usize,
        hash_index: &mut usize,
    ) -> Result<[u8; 32]> {
        if *flag_index >= flag_bits.len() {
            return Err(Error::MalformedInput("ran out of flag bits".to_string()));
        }
        let flag = flag_bits[*flag_index];
        *flag_index += 1;

        if self.is_leaf() || flag == 0 {
            // hash provided directly
            let hash = *hashes
                .get(*hash_index)
                .ok_or_else(|| Error::MalformedInput("ran out of hashes".to_string()))?;
            *hash_index += 1;
            self.set_current(hash);
            return Ok(hash);
        }

        self.left();
        let left_hash = self.traverse(flag_bits, hashes, flag_index, hash_index)?;
        self.up();

        let right_hash = if self.right_exists() {
            self.right();
            let h = self.traverse(flag_bits, hashes, flag_index, hash_index)?;
            self.up();
            h
        } else {
            left_hash
        };

        let parent = merkle_parent(&left_hash, &right_hash);
        self.set_current(parent);
        Ok(parent)
    }
}
