//! The network envelope: magic, command, length, checksum, payload

use crate::error::{Error, Result};
use crate::hashes::hash256;
use crate::varint::{read_bytes, read_u32_le, read_vec};
use std::io::Read;

pub const MAINNET_MAGIC: u32 = 0xf9beb4d9;
pub const TESTNET_MAGIC: u32 = 0x0b110907;

const MAX_COMMAND_LEN: usize = 12;

/// Anything that can ride inside an envelope.
pub trait Message {
    fn command(&self) -> &str;
    fn serialize(&self) -> Result<Vec<u8>>;
}

/// A raw payload under an arbitrary command, for passthrough of message
/// types the core does not model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericMessage {
    pub command: String,
    pub payload: Vec<u8>,
}

impl GenericMessage {
    pub fn new(command: &str, payload: Vec<u8>) -> Self {
        Self {
            command: command.to_string(),
            payload,
        }
    }
}

impl Message for GenericMessage {
    fn command(&self) -> &str {
        &self.command
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(self.payload.clone())
    }
}

/// One framed wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEnvelope {
    pub magic: u32,
    pub command: String,
    pub payload: Vec<u8>,
}

impl NetworkEnvelope {
    pub fn new(command: &str, payload: Vec<u8>, testnet: bool) -> Result<NetworkEnvelope> {
        if command.len() > MAX_COMMAND_LEN {
            return Err(Error::MalformedInput(format!(
                "command too long: {} bytes (max {})",
                command.len(),
                MAX_COMMAND_LEN
            )));
        }
        Ok(NetworkEnvelope {
            magic: if testnet { TESTNET_MAGIC } else { MAINNET_MAGIC },
            command: command.to_string(),
            payload,
        })
    }

    /// Frame a typed message.
    pub fn from_message(message: &dyn Message, testnet: bool) -> Result<NetworkEnvelope> {
        NetworkEnvelope::new(message.command(), message.serialize()?, testnet)
    }

    /// First four bytes of Hash256 of the payload.
    pub fn checksum(&self) -> [u8; 4] {
        let h = hash256(&self.payload);
        [h[0], h[1], h[2], h[3]]
    }

    /// Parse one envelope, validating the checksum. A mismatch discards
    /// the envelope with `ChecksumMismatch`.
    pub fn parse<R: Read>(r: &mut R) -> Result<NetworkEnvelope> {
        let magic = u32::from_be_bytes(read_bytes(r)?);

        let command_bytes: [u8; MAX_COMMAND_LEN] = read_bytes(r)?;
        let end = command_bytes
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(MAX_COMMAND_LEN);
        let command = String::from_utf8(command_bytes[..end].to_vec())
            .map_err(|_| Error::MalformedInput("command is not ascii".to_string()))?;

        let payload_len = read_u32_le(r)? as usize;
        let declared_checksum: [u8; 4] = read_bytes(r)?;
        let payload = read_vec(r, payload_len)?;

        let envelope = NetworkEnvelope {
            magic,
            command,
            payload,
        };
        let expected = envelope.checksum();
        if declared_checksum != expected {
            tracing::debug!(
                command = %envelope.command,
                "discarding envelope with bad checksum"
            );
            return Err(Error::ChecksumMismatch(format!(
                "envelope: got {}, expected {}",
                hex::encode(declared_checksum),
                hex::encode(expected)
            )));
        }
        Ok(envelope)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24 + self.payload.len());
        out.extend_from_slice(&self.magic.to_be_bytes());

        let mut command_bytes = [0u8; MAX_COMMAND_LEN];
        command_bytes[..self.command.len()].copy_from_slice(self.command.as_bytes());
        out.extend_from_slice(&command_bytes);

        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.checksum());
        out.extend_from_slice(&self.payload);
        out
    }
}
