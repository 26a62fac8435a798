//! BIP 152 compact block relay: payloads and mempool-driven block
//! reconstruction

use crate::block::BlockHeader;
use crate::envelope::Message;
use crate::error::{Error, Result};
use crate::mempool::{short_id_keys, Mempool};
use crate::tx::Transaction;
use crate::varint::{encode_varint, read_bytes, read_u64_le, read_varint};
use std::io::Read;

/// A transaction sent along with the compact block at a known position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefilledTransaction {
    pub index: usize,
    pub tx: Transaction,
}

/// The `cmpctblock` payload: header, short-id nonce, short ids and
/// prefilled transactions with differentially-encoded positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactBlockMessage {
    pub header: BlockHeader,
    pub nonce: u64,
    pub short_ids: Vec<[u8; 6]>,
    pub prefilled: Vec<PrefilledTransaction>,
}

impl CompactBlockMessage {
    pub fn parse<R: Read>(r: &mut R, testnet: bool) -> Result<CompactBlockMessage> {
        let header = BlockHeader::parse(r)?;
        let nonce = read_u64_le(r)?;

        let short_id_count = read_varint(r)?;
        let mut short_ids = Vec::with_capacity(short_id_count as usize);
        for _ in 0..short_id_count {
            short_ids.push(read_bytes(r)?);
        }

        let prefilled_count = read_varint(r)?;
        let mut prefilled = Vec::with_capacity(prefilled_count as usize);
        let mut prev_index: i64 = -1;
        for _ in 0..prefilled_count {
            let diff = read_varint(r)? as i64;
            let index = prev_index + diff + 1;
            let tx = Transaction::parse(r, testnet)?;
            prefilled.push(PrefilledTransaction {
                index: index as usize,
                tx,
            });
            prev_index = index;
        }

        Ok(CompactBlockMessage {
            header,
            nonce,
            short_ids,
            prefilled,
        })
    }
}

impl Message for CompactBlockMessage {
    fn command(&self) -> &str {
        "cmpctblock"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.header.serialize());
        out.extend_from_slice(&self.nonce.to_le_bytes());

        out.extend_from_slice(&encode_varint(self.short_ids.len() as u64));
        for sid in &self.short_ids {
            out.extend_from_slice(sid);
        }

        out.extend_from_slice(&encode_varint(self.prefilled.len() as u64));
        let mut prev_index: i64 = -1;
        for pf in &self.prefilled {
            let diff = pf.index as i64 - prev_index - 1;
            if diff < 0 {
                return Err(Error::MalformedInput(
                    "prefilled indexes must be strictly increasing".to_string(),
                ));
            }
            out.extend_from_slice(&encode_varint(diff as u64));
            out.extend_from_slice(&pf.tx.serialize());
            prev_index = pf.index as i64;
        }
        Ok(out)
    }
}

/// The `getblocktxn` request for missing positions, differentially
/// encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlockTxnMessage {
    pub block_hash: [u8; 32],
    pub indexes: Vec<usize>,
}

impl GetBlockTxnMessage {
    pub fn parse<R: Read>(r: &mut R) -> Result<GetBlockTxnMessage> {
        let block_hash = read_bytes(r)?;
        let count = read_varint(r)?;
        let mut indexes = Vec::with_capacity(count as usize);
        let mut prev_index: i64 = -1;
        for _ in 0..count {
            let diff = read_varint(r)? as i64;
            let index = prev_index + diff + 1;
            indexes.push(index as usize);
            prev_index = index;
        }
        Ok(GetBlockTxnMessage {
            block_hash,
            indexes,
        })
    }
}

impl Message for GetBlockTxnMessage {
    fn command(&self) -> &str {
        "getblocktxn"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = self.block_hash.to_vec();
        out.extend_from_slice(&encode_varint(self.indexes.len() as u64));
        let mut prev_index: i64 = -1;
        for index in &self.indexes {
            let diff = *index as i64 - prev_index - 1;
            if diff < 0 {
                return Err(Error::MalformedInput(
                    "indexes must be strictly increasing".to_string(),
                ));
            }
            out.extend_from_slice(&encode_varint(diff as u64));
            prev_index = *index as i64;
        }
        Ok(out)
    }
}

/// The `blocktxn` response carrying the requested transactions in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTxnMessage {
    pub block_hash: [u8; 32],
    pub transactions: Vec<Transaction>,
}

impl BlockTxnMessage {
    pub fn parse<R: Read>(r: &mut R, testnet: bool) -> Result<BlockTxnMessage> {
        let block_hash = read_bytes(r)?;
        let count = read_varint(r)?;
        let mut transactions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            transactions.push(Transaction::parse(r, testnet)?);
        }
        Ok(BlockTxnMessage {
            block_hash,
            transactions,
        })
    }
}

impl Message for BlockTxnMessage {
    fn command(&self) -> &str {
        "blocktxn"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = self.block_hash.to_vec();
        out.extend_from_slice(&encode_varint(self.transactions.len() as u64));
        for tx in &self.transactions {
            out.extend_from_slice(&tx.serialize());
        }
        Ok(out)
    }
}

/// The `sendcmpct` negotiation: mode plus short-id version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendCompactMessage {
    pub high_bandwidth: bool,
    pub version: u64,
}

impl SendCompactMessage {
    pub fn parse<R: Read>(r: &mut R) -> Result<SendCompactMessage> {
        let mode: [u8; 1] = read_bytes(r)?;
        let version = read_u64_le(r)?;
        Ok(SendCompactMessage {
            high_bandwidth: mode[0] == 1,
            version,
        })
    }
}

impl Message for SendCompactMessage {
    fn command(&self) -> &str {
        "sendcmpct"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.high_bandwidth as u8];
        out.extend_from_slice(&self.version.to_le_bytes());
        Ok(out)
    }
}

/// The outcome of compact-block reconstruction: the block's transaction
/// slots, with `None` for still-missing positions listed in `missing`.
#[derive(Debug, Clone)]
pub struct ReconstructedBlock {
    pub header: BlockHeader,
    pub txs: Vec<Option<Transaction>>,
    pub missing: Vec<usize>,
}

/// Rebuild a block from a compact block and the local mempool.
///
/// The short-id version is the one negotiated via `sendcmpct`: version 2
/// matches wtxids, anything else txids. Transactions fetched later with
/// `getblocktxn`/`blocktxn` merge through `missing_txns` on a second
/// call.
pub fn reconstruct_block(
    msg: &CompactBlockMessage,
    pool: &Mempool,
    missing_txns: &[Transaction],
    version: u64,
) -> Result<ReconstructedBlock> {
    let (k0, k1) = short_id_keys(&msg.header, msg.nonce);
    let use_wtxid = version == 2;
    let matches = pool.match_short_ids(&msg.short_ids, k0, k1, use_wtxid);

    let total = msg.short_ids.len() + msg.prefilled.len();
    let mut txs: Vec<Option<Transaction>> = vec![None; total];

    for pf in &msg.prefilled {
        if pf.index >= total {
            return Err(Error::MalformedInput(format!(
                "prefilled index {} out of range for {} slots",
                pf.index, total
            )));
        }
        txs[pf.index] = Some(pf.tx.clone());
    }

    let mut short_id_index = 0usize;
    let mut missing = Vec::new();
    for (i, slot) in txs.iter_mut().enumerate() {
        if slot.is_some() {
            continue; // prefilled
        }
        if short_id_index >= msg.short_ids.len() {
            return Err(Error::MalformedInput(
                "short id list does not cover every open slot".to_string(),
            ));
        }
        let sid = msg.short_ids[short_id_index];
        match matches.get(&sid) {
            Some(tx) => *slot = Some(tx.clone()),
            None => missing.push(i),
        }
        short_id_index += 1;
    }

    // merge transactions recovered via getblocktxn, in position order
    let mut fill = missing_txns.iter();
    let mut still_missing = Vec::new();
    for index in missing {
        match fill.next() {
            Some(tx) => txs[index] = Some(tx.clone()),
            None => still_missing.push(index),
        }
    }

    if !still_missing.is_empty() {
        tracing::debug!(
            missing = still_missing.len(),
            total,
            "compact block reconstruction incomplete"
        );
    }

    Ok(ReconstructedBlock {
        header: msg.header,
        txs,
        missing: still_missing,
    })
}
