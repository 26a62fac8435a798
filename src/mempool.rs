//! The mempool container and BIP 152 short-id derivation

use crate::block::BlockHeader;
use crate::hashes::siphash24;
use crate::tx::Transaction;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

/// Derive the SipHash key pair for a compact block: the first 16 bytes of
/// SHA256(serialized header || nonce_le) as two little-endian words.
pub fn short_id_keys(header: &BlockHeader, nonce: u64) -> (u64, u64) {
    let mut preimage = Vec::with_capacity(88);
    preimage.extend_from_slice(&header.serialize());
    preimage.extend_from_slice(&nonce.to_le_bytes());
    let hash = Sha256::digest(&preimage);

    let k0 = u64::from_le_bytes(hash[0..8].try_into().expect("slice is 8 bytes"));
    let k1 = u64::from_le_bytes(hash[8..16].try_into().expect("slice is 8 bytes"));
    (k0, k1)
}

/// The 6-byte short id of a transaction id. The id must be in internal
/// byte order (reverse of display order).
pub fn short_id(txid_internal: &[u8; 32], k0: u64, k1: u64) -> [u8; 6] {
    let hash = siphash24(k0, k1, txid_internal);
    let bytes = hash.to_le_bytes();
    [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]]
}

/// Unconfirmed transactions keyed by txid, safe for concurrent use under
/// a single mutex.
#[derive(Debug, Default)]
pub struct Mempool {
    txs: Mutex<HashMap<[u8; 32], Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction, returning its txid.
    pub fn add(&self, tx: Transaction) -> [u8; 32] {
        let txid = tx.hash();
        self.txs.lock().expect("mempool lock").insert(txid, tx);
        txid
    }

    pub fn get(&self, txid: &[u8; 32]) -> Option<Transaction> {
        self.txs.lock().expect("mempool lock").get(txid).cloned()
    }

    pub fn remove(&self, txid: &[u8; 32]) {
        self.txs.lock().expect("mempool lock").remove(txid);
    }

    pub fn len(&self) -> usize {
        self.txs.lock().expect("mempool lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every transaction.
    pub fn all(&self) -> Vec<Transaction> {
        self.txs
            .lock()
            .expect("mempool lock")
            .values()
            .cloned()
            .collect()
    }

    /// Match the requested short ids against the pool. Version 2 peers
    /// derive short ids from wtxids, version 1 from txids; either way the
    /// hash feeds SipHash in internal byte order.
    pub fn match_short_ids(
        &self,
        short_ids: &[[u8; 6]],
        k0: u64,
        k1: u64,
        use_wtxid: bool,
    ) -> HashMap<[u8; 6], Transaction> {
        let requested: std::collections::HashSet<[u8; 6]> = short_ids.iter().copied().collect();

        let txs = self.txs.lock().expect("mempool lock");
        let mut matches = HashMap::new();
        for tx in txs.values() {
            let mut hash = if use_wtxid {
                tx.witness_hash()
            } else {
                tx.hash()
            };
            hash.reverse();
            let sid = short_id(&hash, k0, k1);
            if requested.contains(&sid) {
                matches.insert(sid, tx.clone());
            }
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MAINNET_GENESIS_HEADER;
    use crate::script::p2pkh_script;
    use crate::tx::{TxIn, TxOut};
    use std::io::Cursor;

    fn sample_tx(tag: u8) -> Transaction {
        let input = TxIn::new([tag; 32], 0, 0xffff_ffff);
        let output = TxOut::new(tag as u64 * 1000, p2pkh_script(&[tag; 20]));
        Transaction::new(1, vec![input], vec![output], 0, false, false)
    }

    fn genesis_header() -> BlockHeader {
        BlockHeader::parse(&mut Cursor::new(&MAINNET_GENESIS_HEADER[..])).unwrap()
    }

    #[test]
    fn test_add_get_remove() {
        let pool = Mempool::new();
        let tx = sample_tx(1);
        let txid = pool.add(tx.clone());
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(&txid), Some(tx));
        pool.remove(&txid);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_short_id_deterministic() {
        let (k0, k1) = short_id_keys(&genesis_header(), 0x1234_5678);
        let txid = sample_tx(2).hash();
        let mut internal = txid;
        internal.reverse();
        assert_eq!(short_id(&internal, k0, k1), short_id(&internal, k0, k1));

        // a different nonce must move the keys
        let (j0, j1) = short_id_keys(&genesis_header(), 0x1234_5679);
        assert!((k0, k1) != (j0, j1));
    }

    #[test]
    fn test_match_short_ids() {
        let pool = Mempool::new();
        let tx1 = sample_tx(1);
        let tx2 = sample_tx(2);
        pool.add(tx1.clone());
        pool.add(tx2.clone());

        let (k0, k1) = short_id_keys(&genesis_header(), 99);
        let mut id1 = tx1.hash();
        id1.reverse();
        let sid1 = short_id(&id1, k0, k1);

        let matches = pool.match_short_ids(&[sid1], k0, k1, false);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches.get(&sid1), Some(&tx1));
    }

    #[test]
    fn test_match_short_ids_wtxid_variant() {
        let pool = Mempool::new();
        let mut tx = sample_tx(3);
        tx.segwit = true;
        tx.inputs[0].witness = vec![vec![0xaa; 10]];
        pool.add(tx.clone());

        let (k0, k1) = short_id_keys(&genesis_header(), 7);
        let mut wid = tx.witness_hash();
        wid.reverse();
        let sid = short_id(&wid, k0, k1);

        let matches = pool.match_short_ids(&[sid], k0, k1, true);
        assert_eq!(matches.len(), 1);
        // txid-based matching must not find it
        let matches = pool.match_short_ids(&[sid], k0, k1, false);
        assert!(matches.is_empty());
    }
}
