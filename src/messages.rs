//! Light-client wire payloads: handshake, keepalive, header sync and
//! inventory requests

use crate::block::BlockHeader;
use crate::envelope::Message;
use crate::error::{Error, Result};
use crate::tx::Transaction;
use crate::varint::{encode_varint, read_bytes, read_u32_le, read_u64_le, read_varint, read_vec};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// The protocol version this peer speaks.
pub const PROTOCOL_VERSION: u32 = 70015;

/// Service bit advertising witness support.
pub const NODE_WITNESS: u64 = 1 << 3;

/// A network address entry as embedded in `version` (no timestamp field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetAddr {
    pub services: u64,
    pub address: [u8; 16],
    pub port: u16,
}

impl NetAddr {
    pub fn new(services: u64, address: [u8; 16], port: u16) -> Self {
        Self {
            services,
            address,
            port,
        }
    }

    /// An all-zero address, used for the sender slot.
    pub fn unspecified(port: u16) -> Self {
        Self::new(0, [0u8; 16], port)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(26);
        out.extend_from_slice(&self.services.to_le_bytes());
        out.extend_from_slice(&self.address);
        out.extend_from_slice(&self.port.to_be_bytes());
        out
    }

    pub fn parse<R: Read>(r: &mut R) -> Result<NetAddr> {
        let services = read_u64_le(r)?;
        let address = read_bytes(r)?;
        let port = u16::from_be_bytes(read_bytes(r)?);
        Ok(NetAddr {
            services,
            address,
            port,
        })
    }
}

/// The `version` handshake payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: u32,
    pub services: u64,
    pub timestamp: i64,
    pub receiver: NetAddr,
    pub sender: NetAddr,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

impl VersionMessage {
    /// A default handshake toward `receiver`. The caller supplies the
    /// clock reading and handshake nonce.
    pub fn new(receiver: NetAddr, timestamp: i64, nonce: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            services: NODE_WITNESS,
            timestamp,
            receiver,
            sender: NetAddr::unspecified(receiver.port),
            nonce,
            user_agent: "/lightpeer:0.1/".to_string(),
            start_height: 0,
            relay: false,
        }
    }

    pub fn parse<R: Read>(r: &mut R) -> Result<VersionMessage> {
        let version = read_u32_le(r)?;
        let services = read_u64_le(r)?;
        let timestamp = read_u64_le(r)? as i64;
        let receiver = NetAddr::parse(r)?;
        let sender = NetAddr::parse(r)?;
        let nonce = read_u64_le(r)?;
        let agent_len = read_varint(r)? as usize;
        let user_agent = String::from_utf8(read_vec(r, agent_len)?)
            .map_err(|_| Error::MalformedInput("user agent is not utf-8".to_string()))?;
        let start_height = read_u32_le(r)? as i32;
        let relay = read_bytes::<_, 1>(r)?[0] != 0;
        Ok(VersionMessage {
            version,
            services,
            timestamp,
            receiver,
            sender,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

impl Message for VersionMessage {
    fn command(&self) -> &str {
        "version"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.services.to_le_bytes());
        out.extend_from_slice(&(self.timestamp as u64).to_le_bytes());
        out.extend_from_slice(&self.receiver.serialize());
        out.extend_from_slice(&self.sender.serialize());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(&encode_varint(self.user_agent.len() as u64));
        out.extend_from_slice(self.user_agent.as_bytes());
        out.extend_from_slice(&(self.start_height as u32).to_le_bytes());
        out.push(self.relay as u8);
        Ok(out)
    }
}

/// The empty `verack` acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerAckMessage;

impl Message for VerAckMessage {
    fn command(&self) -> &str {
        "verack"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Keepalive probe with an 8-byte nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingMessage {
    pub nonce: u64,
}

impl PingMessage {
    pub fn parse<R: Read>(r: &mut R) -> Result<PingMessage> {
        Ok(PingMessage {
            nonce: read_u64_le(r)?,
        })
    }
}

impl Message for PingMessage {
    fn command(&self) -> &str {
        "ping"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(self.nonce.to_le_bytes().to_vec())
    }
}

/// Keepalive answer echoing the probe nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PongMessage {
    pub nonce: u64,
}

impl PongMessage {
    pub fn parse<R: Read>(r: &mut R) -> Result<PongMessage> {
        Ok(PongMessage {
            nonce: read_u64_le(r)?,
        })
    }
}

impl Message for PongMessage {
    fn command(&self) -> &str {
        "pong"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(self.nonce.to_le_bytes().to_vec())
    }
}

/// Header-sync request: locator hashes plus a stop hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetHeadersMessage {
    pub version: u32,
    pub block_locators: Vec<[u8; 32]>,
    pub hash_stop: [u8; 32],
}

impl GetHeadersMessage {
    pub fn new(block_locators: Vec<[u8; 32]>, hash_stop: Option<[u8; 32]>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            block_locators,
            hash_stop: hash_stop.unwrap_or([0u8; 32]),
        }
    }

    pub fn parse<R: Read>(r: &mut R) -> Result<GetHeadersMessage> {
        let version = read_u32_le(r)?;
        let count = read_varint(r)?;
        let mut block_locators = Vec::with_capacity(count as usize);
        for _ in 0..count {
            block_locators.push(read_bytes(r)?);
        }
        let hash_stop = read_bytes(r)?;
        Ok(GetHeadersMessage {
            version,
            block_locators,
            hash_stop,
        })
    }
}

impl Message for GetHeadersMessage {
    fn command(&self) -> &str {
        "getheaders"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&encode_varint(self.block_locators.len() as u64));
        for locator in &self.block_locators {
            out.extend_from_slice(locator);
        }
        out.extend_from_slice(&self.hash_stop);
        Ok(out)
    }
}

/// Header-sync response: each header rides with a zero transaction count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersMessage {
    pub headers: Vec<BlockHeader>,
}

impl HeadersMessage {
    pub fn parse<R: Read>(r: &mut R) -> Result<HeadersMessage> {
        let count = read_varint(r)?;
        let mut headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            headers.push(BlockHeader::parse(r)?);
            let num_txs = read_varint(r)?;
            if num_txs != 0 {
                return Err(Error::MalformedInput(format!(
                    "headers entry carries {} transactions, expected 0",
                    num_txs
                )));
            }
        }
        Ok(HeadersMessage { headers })
    }
}

impl Message for HeadersMessage {
    fn command(&self) -> &str {
        "headers"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = encode_varint(self.headers.len() as u64);
        for header in &self.headers {
            out.extend_from_slice(&header.serialize());
            out.push(0x00);
        }
        Ok(out)
    }
}

/// Inventory object kinds for `getdata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DataType {
    Error = 0,
    Tx = 1,
    Block = 2,
    FilteredBlock = 3,
    CompactBlock = 4,
}

/// Witness-serialization flag OR'd into a getdata type.
pub const MSG_WITNESS_FLAG: u32 = 0x4000_0000;

/// One requested object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataItem {
    pub item_type: u32,
    pub identifier: [u8; 32],
}

/// The `getdata` request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetDataMessage {
    pub items: Vec<DataItem>,
}

impl GetDataMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_data(&mut self, data_type: DataType, identifier: [u8; 32]) {
        self.items.push(DataItem {
            item_type: data_type as u32,
            identifier,
        });
    }

    /// Request the witness serialization of an object.
    pub fn add_witness_data(&mut self, data_type: DataType, identifier: [u8; 32]) {
        self.items.push(DataItem {
            item_type: data_type as u32 | MSG_WITNESS_FLAG,
            identifier,
        });
    }

    pub fn parse<R: Read>(r: &mut R) -> Result<GetDataMessage> {
        let count = read_varint(r)?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let item_type = read_u32_le(r)?;
            let identifier = read_bytes(r)?;
            items.push(DataItem {
                item_type,
                identifier,
            });
        }
        Ok(GetDataMessage { items })
    }
}

impl Message for GetDataMessage {
    fn command(&self) -> &str {
        "getdata"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = encode_varint(self.items.len() as u64);
        for item in &self.items {
            out.extend_from_slice(&item.item_type.to_le_bytes());
            out.extend_from_slice(&item.identifier);
        }
        Ok(out)
    }
}

impl Message for Transaction {
    fn command(&self) -> &str {
        "tx"
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(Transaction::serialize(self))
    }
}
