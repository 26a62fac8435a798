//! Script bytecode: command codec, spending templates, number encoding

use crate::base58::encode_base58check;
use crate::engine::ScriptEngine;
use crate::error::{Error, Result};
use crate::varint::{encode_varint, read_varint, read_vec};
use std::io::Read;

// Constants and pushdata
pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;

// Flow control
pub const OP_IF: u8 = 0x63;
pub const OP_NOTIF: u8 = 0x64;
pub const OP_ELSE: u8 = 0x67;
pub const OP_ENDIF: u8 = 0x68;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_RETURN: u8 = 0x6a;

// Stack operations
pub const OP_TOALTSTACK: u8 = 0x6b;
pub const OP_FROMALTSTACK: u8 = 0x6c;
pub const OP_2DROP: u8 = 0x6d;
pub const OP_2DUP: u8 = 0x6e;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_SWAP: u8 = 0x7c;

// Comparison and logic
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_NOT: u8 = 0x91;

// Arithmetic
pub const OP_ADD: u8 = 0x93;
pub const OP_SUB: u8 = 0x94;

// Crypto
pub const OP_RIPEMD160: u8 = 0xa6;
pub const OP_SHA1: u8 = 0xa7;
pub const OP_SHA256: u8 = 0xa8;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_HASH256: u8 = 0xaa;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;

// Locktime
pub const OP_CHECKLOCKTIMEVERIFY: u8 = 0xb1;
pub const OP_CHECKSEQUENCEVERIFY: u8 = 0xb2;

/// A single parsed script element: either a raw opcode or a pushed blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    Op(u8),
    Data(Vec<u8>),
}

impl ScriptCommand {
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            ScriptCommand::Data(d) => Some(d),
            ScriptCommand::Op(_) => None,
        }
    }
}

/// An ordered list of script commands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    pub cmds: Vec<ScriptCommand>,
}

impl Script {
    pub fn new(cmds: Vec<ScriptCommand>) -> Self {
        Self { cmds }
    }

    /// Parse a varint-length-prefixed script from a stream.
    pub fn parse<R: Read>(r: &mut R) -> Result<Script> {
        let length = read_varint(r)? as usize;
        let bytes = read_vec(r, length)?;
        Script::parse_raw(&bytes)
    }

    /// Parse raw script bytes (no length prefix) into commands.
    pub fn parse_raw(bytes: &[u8]) -> Result<Script> {
        fn take<'a>(bytes: &'a [u8], i: &mut usize, n: usize) -> Result<&'a [u8]> {
            if *i + n > bytes.len() {
                return Err(Error::MalformedInput(format!(
                    "script push of {} bytes overruns script end",
                    n
                )));
            }
            let slice = &bytes[*i..*i + n];
            *i += n;
            Ok(slice)
        }

        let mut cmds = Vec::new();
        let mut i = 0usize;
        while i < bytes.len() {
            let current = bytes[i];
            i += 1;
            match current {
                1..=75 => {
                    let data = take(bytes, &mut i, current as usize)?.to_vec();
                    cmds.push(ScriptCommand::Data(data));
                }
                OP_PUSHDATA1 => {
                    let len = take(bytes, &mut i, 1)?[0] as usize;
                    let data = take(bytes, &mut i, len)?.to_vec();
                    cmds.push(ScriptCommand::Data(data));
                }
                OP_PUSHDATA2 => {
                    let len_bytes = take(bytes, &mut i, 2)?;
                    let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
                    let data = take(bytes, &mut i, len)?.to_vec();
                    cmds.push(ScriptCommand::Data(data));
                }
                OP_PUSHDATA4 => {
                    let len_bytes = take(bytes, &mut i, 4)?;
                    let len =
                        u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
                            as usize;
                    let data = take(bytes, &mut i, len)?.to_vec();
                    cmds.push(ScriptCommand::Data(data));
                }
                op => cmds.push(ScriptCommand::Op(op)),
            }
        }

        Ok(Script { cmds })
    }

    /// Reconstructed script bytes without a length prefix. Pushes are
    /// re-emitted in their minimum-width form.
    pub fn raw_serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for cmd in &self.cmds {
            match cmd {
                ScriptCommand::Op(op) => out.push(*op),
                ScriptCommand::Data(data) => {
                    let len = data.len();
                    if len <= 75 {
                        out.push(len as u8);
                    } else if len <= 0xff {
                        out.push(OP_PUSHDATA1);
                        out.push(len as u8);
                    } else if len <= 0xffff {
                        out.push(OP_PUSHDATA2);
                        out.extend_from_slice(&(len as u16).to_le_bytes());
                    } else {
                        out.push(OP_PUSHDATA4);
                        out.extend_from_slice(&(len as u32).to_le_bytes());
                    }
                    out.extend_from_slice(data);
                }
            }
        }
        out
    }

    /// Script bytes with the varint length prefix used on the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let raw = self.raw_serialize();
        let mut out = encode_varint(raw.len() as u64);
        out.extend_from_slice(&raw);
        out
    }

    /// Concatenate this script (a ScriptSig) with a ScriptPubKey.
    pub fn combine(&self, script_pubkey: &Script) -> Script {
        let mut cmds = Vec::with_capacity(self.cmds.len() + script_pubkey.cmds.len());
        cmds.extend(self.cmds.iter().cloned());
        cmds.extend(script_pubkey.cmds.iter().cloned());
        Script { cmds }
    }

    /// Run the script to a boolean verdict.
    pub fn evaluate(&self, z: &[u8], witness: &[Vec<u8>], locktime: u32, sequence: u32) -> bool {
        ScriptEngine::new(self.clone())
            .with_witness(witness.to_vec())
            .with_locktime(locktime)
            .with_sequence(sequence)
            .execute(z)
    }

    /// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
    pub fn is_p2pkh_script_pubkey(&self) -> bool {
        matches!(
            self.cmds.as_slice(),
            [
                ScriptCommand::Op(OP_DUP),
                ScriptCommand::Op(OP_HASH160),
                ScriptCommand::Data(h),
                ScriptCommand::Op(OP_EQUALVERIFY),
                ScriptCommand::Op(OP_CHECKSIG),
            ] if h.len() == 20
        )
    }

    /// `OP_HASH160 <20> OP_EQUAL`
    pub fn is_p2sh_script_pubkey(&self) -> bool {
        matches!(
            self.cmds.as_slice(),
            [
                ScriptCommand::Op(OP_HASH160),
                ScriptCommand::Data(h),
                ScriptCommand::Op(OP_EQUAL),
            ] if h.len() == 20
        )
    }

    /// `OP_0 <20>`
    pub fn is_p2wpkh_script_pubkey(&self) -> bool {
        matches!(
            self.cmds.as_slice(),
            [ScriptCommand::Op(OP_0), ScriptCommand::Data(h)] if h.len() == 20
        )
    }

    /// `OP_0 <32>`
    pub fn is_p2wsh_script_pubkey(&self) -> bool {
        matches!(
            self.cmds.as_slice(),
            [ScriptCommand::Op(OP_0), ScriptCommand::Data(h)] if h.len() == 32
        )
    }

    /// Base58Check address for a recognized P2SH or P2PKH ScriptPubKey.
    pub fn address(&self, testnet: bool) -> Result<String> {
        if self.is_p2sh_script_pubkey() {
            let h160 = self.cmds[1].data().expect("template checked");
            Ok(p2sh_address(h160, testnet))
        } else if self.is_p2pkh_script_pubkey() {
            let h160 = self.cmds[2].data().expect("template checked");
            Ok(p2pkh_address(h160, testnet))
        } else {
            Err(Error::MalformedInput(
                "script is not a recognized address template".to_string(),
            ))
        }
    }
}

/// Build the P2PKH ScriptPubKey for a 20-byte hash.
pub fn p2pkh_script(h160: &[u8]) -> Script {
    Script::new(vec![
        ScriptCommand::Op(OP_DUP),
        ScriptCommand::Op(OP_HASH160),
        ScriptCommand::Data(h160.to_vec()),
        ScriptCommand::Op(OP_EQUALVERIFY),
        ScriptCommand::Op(OP_CHECKSIG),
    ])
}

/// Build the P2WPKH ScriptPubKey (version-0 witness program) for a
/// 20-byte hash.
pub fn p2wpkh_script(h160: &[u8]) -> Script {
    Script::new(vec![
        ScriptCommand::Op(OP_0),
        ScriptCommand::Data(h160.to_vec()),
    ])
}

pub fn p2pkh_address(h160: &[u8], testnet: bool) -> String {
    let prefix = if testnet { 0x6f } else { 0x00 };
    let mut payload = vec![prefix];
    payload.extend_from_slice(h160);
    encode_base58check(&payload)
}

pub fn p2sh_address(h160: &[u8], testnet: bool) -> String {
    let prefix = if testnet { 0xc4 } else { 0x05 };
    let mut payload = vec![prefix];
    payload.extend_from_slice(h160);
    encode_base58check(&payload)
}

/// Encode an integer in Script's little-endian sign-bit format. Zero is
/// the empty byte string.
pub fn encode_num(n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let negative = n < 0;
    let mut abs = n.unsigned_abs();

    let mut result = Vec::new();
    while abs > 0 {
        result.push((abs & 0xff) as u8);
        abs >>= 8;
    }

    let last = *result.last().expect("non-zero value has bytes");
    if last & 0x80 != 0 {
        result.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        let idx = result.len() - 1;
        result[idx] |= 0x80;
    }
    result
}

/// Decode Script's little-endian sign-bit integer format.
pub fn decode_num(data: &[u8]) -> i64 {
    if data.is_empty() {
        return 0;
    }
    let negative = data[data.len() - 1] & 0x80 != 0;

    let mut result: i64 = 0;
    for (i, byte) in data.iter().enumerate().rev() {
        result <<= 8;
        if i == data.len() - 1 {
            result |= (byte & 0x7f) as i64;
        } else {
            result |= *byte as i64;
        }
    }

    if negative {
        -result
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_p2pkh() {
        let raw = hex::decode("76a914338c84849423992471bffb1a54a8d9b1d69dc28f88ac").unwrap();
        let script = Script::parse_raw(&raw).unwrap();
        assert!(script.is_p2pkh_script_pubkey());
        assert_eq!(script.raw_serialize(), raw);
    }

    #[test]
    fn test_parse_with_length_prefix() {
        let mut bytes = encode_varint(3);
        bytes.extend_from_slice(&[OP_1, OP_1, OP_ADD]);
        let script = Script::parse(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(script.cmds.len(), 3);
    }

    #[test]
    fn test_serialize_round_trip() {
        let script = Script::new(vec![
            ScriptCommand::Data(vec![0xaa; 10]),
            ScriptCommand::Op(OP_DUP),
            ScriptCommand::Data(vec![0xbb; 200]),
        ]);
        let serialized = script.serialize();
        let parsed = Script::parse(&mut Cursor::new(serialized.clone())).unwrap();
        assert_eq!(parsed, script);
        assert_eq!(parsed.serialize(), serialized);
    }

    #[test]
    fn test_pushdata1_threshold() {
        // 76 bytes needs OP_PUSHDATA1, 75 does not
        let s75 = Script::new(vec![ScriptCommand::Data(vec![0u8; 75])]);
        assert_eq!(s75.raw_serialize()[0], 75);
        let s76 = Script::new(vec![ScriptCommand::Data(vec![0u8; 76])]);
        assert_eq!(s76.raw_serialize()[0], OP_PUSHDATA1);
    }

    #[test]
    fn test_pushdata2_threshold() {
        let s = Script::new(vec![ScriptCommand::Data(vec![0u8; 0x100])]);
        assert_eq!(s.raw_serialize()[0], OP_PUSHDATA2);
        let parsed = Script::parse_raw(&s.raw_serialize()).unwrap();
        assert_eq!(parsed, s);
    }

    #[test]
    fn test_truncated_push_rejected() {
        // push of 5 bytes but only 2 available
        assert!(Script::parse_raw(&[0x05, 0x01, 0x02]).is_err());
    }

    #[test]
    fn test_templates() {
        let p2sh = hex::decode("a91474d691da1574e6b3c192ecfb52cc8984ee7b6c5687").unwrap();
        assert!(Script::parse_raw(&p2sh).unwrap().is_p2sh_script_pubkey());

        let p2wpkh = p2wpkh_script(&[0x11; 20]);
        assert!(p2wpkh.is_p2wpkh_script_pubkey());
        assert!(!p2wpkh.is_p2wsh_script_pubkey());

        let p2wsh = Script::new(vec![
            ScriptCommand::Op(OP_0),
            ScriptCommand::Data(vec![0x22; 32]),
        ]);
        assert!(p2wsh.is_p2wsh_script_pubkey());
    }

    #[test]
    fn test_encode_num() {
        assert_eq!(encode_num(0), Vec::<u8>::new());
        assert_eq!(encode_num(1), vec![0x01]);
        assert_eq!(encode_num(-1), vec![0x81]);
        assert_eq!(encode_num(127), vec![0x7f]);
        assert_eq!(encode_num(128), vec![0x80, 0x00]);
        assert_eq!(encode_num(-128), vec![0x80, 0x80]);
        assert_eq!(encode_num(256), vec![0x00, 0x01]);
    }

    #[test]
    fn test_decode_num_round_trip() {
        for n in [-70000i64, -256, -128, -1, 0, 1, 127, 128, 255, 256, 500_000_000] {
            assert_eq!(decode_num(&encode_num(n)), n);
        }
    }

    #[test]
    fn test_combine() {
        let a = Script::new(vec![ScriptCommand::Op(OP_1)]);
        let b = Script::new(vec![ScriptCommand::Op(OP_1), ScriptCommand::Op(OP_EQUAL)]);
        let combined = a.combine(&b);
        assert_eq!(combined.cmds.len(), 3);
    }

    #[test]
    fn test_script_address() {
        let p2sh = hex::decode("a91474d691da1574e6b3c192ecfb52cc8984ee7b6c5687").unwrap();
        let script = Script::parse_raw(&p2sh).unwrap();
        let addr = script.address(false).unwrap();
        assert!(addr.starts_with('3'));
    }
}
