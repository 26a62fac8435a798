//! Transactions: the on-wire model, signature hashes, and input
//! authentication

use crate::error::{Error, Result};
use crate::hashes::{hash256, SIGHASH_ALL};
use crate::keys::PrivateKey;
use crate::script::{p2pkh_script, Script, ScriptCommand};
use crate::varint::{encode_varint, read_bytes, read_u32_le, read_u64_le, read_varint, read_vec};
use num_bigint::{BigInt, Sign};
use std::cell::OnceCell;
use std::io::{Cursor, Read};

/// Supplies the output being spent by an input. May block on I/O; failures
/// surface as `NotFound` or `NetworkError`.
pub trait OutputResolver {
    /// `prev_txid` is in display order, as carried by [`TxIn::prev_tx`].
    fn resolve(&self, prev_txid: &[u8; 32], prev_index: u32, testnet: bool) -> Result<TxOut>;
}

/// The script-sig slot of an input. Coinbase inputs carry arbitrary bytes
/// that must not be parsed as script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSig {
    Script(Script),
    Raw(Vec<u8>),
}

impl ScriptSig {
    pub fn empty() -> Self {
        ScriptSig::Script(Script::default())
    }

    pub fn script(&self) -> Option<&Script> {
        match self {
            ScriptSig::Script(s) => Some(s),
            ScriptSig::Raw(_) => None,
        }
    }

    /// View as a script for evaluation; raw bytes become a single push.
    pub fn as_script(&self) -> Script {
        match self {
            ScriptSig::Script(s) => s.clone(),
            ScriptSig::Raw(bytes) => Script::new(vec![ScriptCommand::Data(bytes.clone())]),
        }
    }

    fn serialize(&self) -> Vec<u8> {
        match self {
            ScriptSig::Script(s) => s.serialize(),
            ScriptSig::Raw(bytes) => {
                let mut out = encode_varint(bytes.len() as u64);
                out.extend_from_slice(bytes);
                out
            }
        }
    }
}

/// A transaction input. `prev_tx` is kept in display order (reversed from
/// the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub prev_tx: [u8; 32],
    pub prev_index: u32,
    pub script_sig: ScriptSig,
    pub sequence: u32,
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    pub fn new(prev_tx: [u8; 32], prev_index: u32, sequence: u32) -> Self {
        Self {
            prev_tx,
            prev_index,
            script_sig: ScriptSig::empty(),
            sequence,
            witness: Vec::new(),
        }
    }

    fn is_coinbase_outpoint(prev_tx: &[u8; 32], prev_index: u32) -> bool {
        prev_index == 0xffff_ffff && prev_tx.iter().all(|b| *b == 0)
    }

    pub fn parse<R: Read>(r: &mut R) -> Result<TxIn> {
        let mut prev_tx: [u8; 32] = read_bytes(r)?;
        prev_tx.reverse();
        let prev_index = read_u32_le(r)?;

        let script_sig = if Self::is_coinbase_outpoint(&prev_tx, prev_index) {
            let len = read_varint(r)? as usize;
            ScriptSig::Raw(read_vec(r, len)?)
        } else {
            ScriptSig::Script(Script::parse(r)?)
        };

        let sequence = read_u32_le(r)?;
        Ok(TxIn {
            prev_tx,
            prev_index,
            script_sig,
            sequence,
            witness: Vec::new(),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(40);
        let mut wire_hash = self.prev_tx;
        wire_hash.reverse();
        out.extend_from_slice(&wire_hash);
        out.extend_from_slice(&self.prev_index.to_le_bytes());
        out.extend_from_slice(&self.script_sig.serialize());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out
    }

    /// Amount of the previous output, via the resolver.
    pub fn value(&self, resolver: &dyn OutputResolver, testnet: bool) -> Result<u64> {
        Ok(resolver.resolve(&self.prev_tx, self.prev_index, testnet)?.amount)
    }

    /// ScriptPubKey of the previous output, via the resolver.
    pub fn script_pubkey(&self, resolver: &dyn OutputResolver, testnet: bool) -> Result<Script> {
        Ok(resolver
            .resolve(&self.prev_tx, self.prev_index, testnet)?
            .script_pubkey)
    }
}

/// A transaction output. The raw on-wire script bytes are retained even
/// when they do not parse, which BIP 158 filter extraction requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub amount: u64,
    pub script_pubkey: Script,
    pub raw_script: Vec<u8>,
}

impl TxOut {
    pub fn new(amount: u64, script_pubkey: Script) -> Self {
        let raw_script = script_pubkey.raw_serialize();
        Self {
            amount,
            script_pubkey,
            raw_script,
        }
    }

    pub fn parse<R: Read>(r: &mut R) -> Result<TxOut> {
        let amount = read_u64_le(r)?;
        let len = read_varint(r)? as usize;
        let raw_script = read_vec(r, len)?;
        // some chain scripts are intentionally unparseable; keep the bytes
        let script_pubkey = Script::parse_raw(&raw_script).unwrap_or_default();
        Ok(TxOut {
            amount,
            script_pubkey,
            raw_script,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9 + self.raw_script.len());
        out.extend_from_slice(&self.amount.to_le_bytes());
        out.extend_from_slice(&encode_varint(self.raw_script.len() as u64));
        out.extend_from_slice(&self.raw_script);
        out
    }
}

/// A Bitcoin transaction, legacy or SegWit.
#[derive(Debug, Default)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub locktime: u32,
    pub testnet: bool,
    pub segwit: bool,

    // BIP 143 midstate, populated on first use and cleared on mutation
    hash_prevouts: OnceCell<[u8; 32]>,
    hash_sequence: OnceCell<[u8; 32]>,
    hash_outputs: OnceCell<[u8; 32]>,
}

impl Clone for Transaction {
    fn clone(&self) -> Self {
        Transaction {
            version: self.version,
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            locktime: self.locktime,
            testnet: self.testnet,
            segwit: self.segwit,
            hash_prevouts: OnceCell::new(),
            hash_sequence: OnceCell::new(),
            hash_outputs: OnceCell::new(),
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.locktime == other.locktime
            && self.segwit == other.segwit
    }
}

impl Eq for Transaction {}

impl Transaction {
    pub fn new(
        version: u32,
        inputs: Vec<TxIn>,
        outputs: Vec<TxOut>,
        locktime: u32,
        testnet: bool,
        segwit: bool,
    ) -> Self {
        Transaction {
            version,
            inputs,
            outputs,
            locktime,
            testnet,
            segwit,
            ..Default::default()
        }
    }

    /// Parse either layout. The byte after the version decides: 0x00 is the
    /// SegWit marker, anything else begins the input count.
    pub fn parse<R: Read>(r: &mut R, testnet: bool) -> Result<Transaction> {
        let mut head = [0u8; 5];
        r.read_exact(&mut head)?;
        let version = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);

        if head[4] == 0x00 {
            Self::parse_segwit(r, version, testnet)
        } else {
            // push the peeked byte back in front of the stream
            let mut chained = Cursor::new(vec![head[4]]).chain(r);
            Self::parse_legacy(&mut chained, version, testnet)
        }
    }

    fn parse_legacy<R: Read>(r: &mut R, version: u32, testnet: bool) -> Result<Transaction> {
        let (inputs, outputs) = Self::parse_body(r)?;
        let locktime = read_u32_le(r)?;
        Ok(Transaction::new(version, inputs, outputs, locktime, testnet, false))
    }

    fn parse_segwit<R: Read>(r: &mut R, version: u32, testnet: bool) -> Result<Transaction> {
        let flag: [u8; 1] = read_bytes(r)?;
        if flag[0] != 0x01 {
            return Err(Error::MalformedInput(format!(
                "unknown segwit flag {:#04x}",
                flag[0]
            )));
        }

        let (mut inputs, outputs) = Self::parse_body(r)?;
        for input in inputs.iter_mut() {
            let item_count = read_varint(r)?;
            let mut items = Vec::with_capacity(item_count as usize);
            for _ in 0..item_count {
                let item_len = read_varint(r)? as usize;
                items.push(read_vec(r, item_len)?);
            }
            input.witness = items;
        }

        let locktime = read_u32_le(r)?;
        Ok(Transaction::new(version, inputs, outputs, locktime, testnet, true))
    }

    fn parse_body<R: Read>(r: &mut R) -> Result<(Vec<TxIn>, Vec<TxOut>)> {
        let input_count = read_varint(r)?;
        let mut inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            inputs.push(TxIn::parse(r)?);
        }

        let output_count = read_varint(r)?;
        let mut outputs = Vec::with_capacity(output_count as usize);
        for _ in 0..output_count {
            outputs.push(TxOut::parse(r)?);
        }
        Ok((inputs, outputs))
    }

    /// Serialize in the layout the transaction was built with.
    pub fn serialize(&self) -> Vec<u8> {
        if self.segwit {
            self.serialize_segwit()
        } else {
            self.serialize_legacy()
        }
    }

    /// Legacy layout, also the preimage layout for txids.
    pub fn serialize_legacy(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&encode_varint(self.inputs.len() as u64));
        for input in &self.inputs {
            out.extend_from_slice(&input.serialize());
        }
        out.extend_from_slice(&encode_varint(self.outputs.len() as u64));
        for output in &self.outputs {
            out.extend_from_slice(&output.serialize());
        }
        out.extend_from_slice(&self.locktime.to_le_bytes());
        out
    }

    /// SegWit layout: marker and flag after the version, witness stacks
    /// before the locktime.
    pub fn serialize_segwit(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(0x00);
        out.push(0x01);
        out.extend_from_slice(&encode_varint(self.inputs.len() as u64));
        for input in &self.inputs {
            out.extend_from_slice(&input.serialize());
        }
        out.extend_from_slice(&encode_varint(self.outputs.len() as u64));
        for output in &self.outputs {
            out.extend_from_slice(&output.serialize());
        }
        for input in &self.inputs {
            out.extend_from_slice(&encode_varint(input.witness.len() as u64));
            for item in &input.witness {
                out.extend_from_slice(&encode_varint(item.len() as u64));
                out.extend_from_slice(item);
            }
        }
        out.extend_from_slice(&self.locktime.to_le_bytes());
        out
    }

    /// Transaction id bytes in display order: Hash256 of the legacy
    /// serialization, reversed.
    pub fn hash(&self) -> [u8; 32] {
        let mut h = hash256(&self.serialize_legacy());
        h.reverse();
        h
    }

    /// Witness id bytes in display order: Hash256 of the full
    /// serialization, reversed.
    pub fn witness_hash(&self) -> [u8; 32] {
        let mut h = hash256(&self.serialize());
        h.reverse();
        h
    }

    /// Hex transaction id.
    pub fn id(&self) -> String {
        hex::encode(self.hash())
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && TxIn::is_coinbase_outpoint(&self.inputs[0].prev_tx, self.inputs[0].prev_index)
    }

    /// BIP 34 block height from the first push of the coinbase script.
    pub fn coinbase_height(&self) -> Option<i64> {
        if !self.is_coinbase() {
            return None;
        }
        match &self.inputs[0].script_sig {
            ScriptSig::Raw(bytes) => {
                let len = *bytes.first()? as usize;
                if (1..=75).contains(&len) && bytes.len() > len {
                    Some(crate::script::decode_num(&bytes[1..1 + len]))
                } else {
                    None
                }
            }
            ScriptSig::Script(script) => script
                .cmds
                .first()
                .and_then(|cmd| cmd.data())
                .map(crate::script::decode_num),
        }
    }

    /// Fee in satoshi. `NegativeFee` when outputs exceed inputs.
    pub fn fee(&self, resolver: &dyn OutputResolver) -> Result<u64> {
        let mut input_sum: u64 = 0;
        for input in &self.inputs {
            input_sum += input.value(resolver, self.testnet)?;
        }
        let output_sum: u64 = self.outputs.iter().map(|o| o.amount).sum();
        if output_sum > input_sum {
            return Err(Error::NegativeFee(format!(
                "outputs {} exceed inputs {}",
                output_sum, input_sum
            )));
        }
        Ok(input_sum - output_sum)
    }

    /// Legacy SIGHASH_ALL signature hash for one input.
    ///
    /// The previous ScriptPubKey replaces this input's ScriptSig; a P2SH
    /// previous output is replaced by the redeem script recovered from the
    /// final push of the ScriptSig.
    pub fn sighash(&self, input_index: usize, resolver: &dyn OutputResolver) -> Result<[u8; 32]> {
        let input = self
            .inputs
            .get(input_index)
            .ok_or_else(|| Error::MalformedInput(format!("input index {} out of range", input_index)))?;
        let mut prev_script = input.script_pubkey(resolver, self.testnet)?;

        if prev_script.is_p2sh_script_pubkey() {
            prev_script = self.redeem_script(input_index)?;
        }

        let mut modified_inputs = Vec::with_capacity(self.inputs.len());
        for (i, original) in self.inputs.iter().enumerate() {
            let mut stripped = TxIn::new(original.prev_tx, original.prev_index, original.sequence);
            if i == input_index {
                stripped.script_sig = ScriptSig::Script(prev_script.clone());
            }
            modified_inputs.push(stripped);
        }

        let modified = Transaction::new(
            self.version,
            modified_inputs,
            self.outputs.clone(),
            self.locktime,
            self.testnet,
            false,
        );

        let mut preimage = modified.serialize_legacy();
        preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
        Ok(hash256(&preimage))
    }

    /// The redeem script held in the final push of a P2SH input's
    /// ScriptSig.
    fn redeem_script(&self, input_index: usize) -> Result<Script> {
        let script_sig = self.inputs[input_index]
            .script_sig
            .script()
            .ok_or_else(|| Error::MalformedP2sh("script-sig is raw bytes".to_string()))?;
        let last = script_sig
            .cmds
            .last()
            .ok_or_else(|| Error::MalformedP2sh("empty script-sig".to_string()))?;
        let data = last
            .data()
            .ok_or_else(|| Error::MalformedP2sh("final element is not a push".to_string()))?;
        Script::parse_raw(data)
            .map_err(|e| Error::MalformedP2sh(format!("redeem script does not parse: {}", e)))
    }

    /// BIP 143 signature hash for witness-v0 spends.
    ///
    /// `redeem_script` supplies the program for nested P2SH-P2WPKH;
    /// `witness_script` supplies the scriptCode for P2WSH.
    pub fn sighash_bip143(
        &self,
        input_index: usize,
        redeem_script: Option<&Script>,
        witness_script: Option<&Script>,
        resolver: &dyn OutputResolver,
    ) -> Result<[u8; 32]> {
        let input = self
            .inputs
            .get(input_index)
            .ok_or_else(|| Error::MalformedInput(format!("input index {} out of range", input_index)))?;

        let mut preimage = Vec::with_capacity(200);
        preimage.extend_from_slice(&self.version.to_le_bytes());
        preimage.extend_from_slice(self.hash_prevouts());
        preimage.extend_from_slice(self.hash_sequence());

        let mut outpoint_hash = input.prev_tx;
        outpoint_hash.reverse();
        preimage.extend_from_slice(&outpoint_hash);
        preimage.extend_from_slice(&input.prev_index.to_le_bytes());

        let script_code = if let Some(ws) = witness_script {
            ws.serialize()
        } else if let Some(rs) = redeem_script {
            let h160 = rs
                .cmds
                .get(1)
                .and_then(|cmd| cmd.data())
                .ok_or_else(|| Error::MalformedP2sh("redeem script is not a witness program".to_string()))?;
            p2pkh_script(h160).serialize()
        } else {
            let prev = input.script_pubkey(resolver, self.testnet)?;
            let h160 = prev
                .cmds
                .get(1)
                .and_then(|cmd| cmd.data())
                .ok_or_else(|| {
                    Error::MalformedInput("previous output is not a witness program".to_string())
                })?;
            p2pkh_script(h160).serialize()
        };
        preimage.extend_from_slice(&script_code);

        let value = input.value(resolver, self.testnet)?;
        preimage.extend_from_slice(&value.to_le_bytes());
        preimage.extend_from_slice(&input.sequence.to_le_bytes());
        preimage.extend_from_slice(self.hash_outputs());
        preimage.extend_from_slice(&self.locktime.to_le_bytes());
        preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());

        Ok(hash256(&preimage))
    }

    /// Hash256 of every outpoint in wire order, cached.
    fn hash_prevouts(&self) -> &[u8; 32] {
        self.hash_prevouts.get_or_init(|| {
            let mut all = Vec::with_capacity(self.inputs.len() * 36);
            for input in &self.inputs {
                let mut wire_hash = input.prev_tx;
                wire_hash.reverse();
                all.extend_from_slice(&wire_hash);
                all.extend_from_slice(&input.prev_index.to_le_bytes());
            }
            hash256(&all)
        })
    }

    /// Hash256 of every sequence number, cached.
    fn hash_sequence(&self) -> &[u8; 32] {
        self.hash_sequence.get_or_init(|| {
            let mut all = Vec::with_capacity(self.inputs.len() * 4);
            for input in &self.inputs {
                all.extend_from_slice(&input.sequence.to_le_bytes());
            }
            hash256(&all)
        })
    }

    /// Hash256 of every serialized output, cached.
    fn hash_outputs(&self) -> &[u8; 32] {
        self.hash_outputs.get_or_init(|| {
            let mut all = Vec::new();
            for output in &self.outputs {
                all.extend_from_slice(&output.serialize());
            }
            hash256(&all)
        })
    }

    /// Drop the BIP 143 midstate. Must run after any input or output
    /// mutation.
    pub fn invalidate_caches(&mut self) {
        self.hash_prevouts.take();
        self.hash_sequence.take();
        self.hash_outputs.take();
    }

    /// Authenticate one input: pick the signature-hash construction from
    /// the previous output's template, combine ScriptSig and ScriptPubKey,
    /// and run the VM.
    pub fn verify_input(&self, input_index: usize, resolver: &dyn OutputResolver) -> Result<bool> {
        let input = self
            .inputs
            .get(input_index)
            .ok_or_else(|| Error::MalformedInput(format!("input index {} out of range", input_index)))?;
        let script_pubkey = input.script_pubkey(resolver, self.testnet)?;

        let z: [u8; 32];
        let mut witness: &[Vec<u8>] = &[];

        if script_pubkey.is_p2wpkh_script_pubkey() {
            z = self.sighash_bip143(input_index, None, None, resolver)?;
            witness = &input.witness;
        } else if script_pubkey.is_p2wsh_script_pubkey() {
            let ws = self.witness_script(input_index)?;
            z = self.sighash_bip143(input_index, None, Some(&ws), resolver)?;
            witness = &input.witness;
        } else if script_pubkey.is_p2sh_script_pubkey() {
            let redeem = self.redeem_script(input_index)?;
            if redeem.is_p2wpkh_script_pubkey() {
                z = self.sighash_bip143(input_index, Some(&redeem), None, resolver)?;
                witness = &input.witness;
            } else if redeem.is_p2wsh_script_pubkey() {
                let ws = self.witness_script(input_index)?;
                z = self.sighash_bip143(input_index, None, Some(&ws), resolver)?;
                witness = &input.witness;
            } else {
                z = self.sighash(input_index, resolver)?;
            }
        } else {
            z = self.sighash(input_index, resolver)?;
        }

        let combined = input.script_sig.as_script().combine(&script_pubkey);
        Ok(combined.evaluate(&z, witness, self.locktime, input.sequence))
    }

    /// The witness script carried as the last witness item of a P2WSH
    /// input.
    fn witness_script(&self, input_index: usize) -> Result<Script> {
        let last = self.inputs[input_index]
            .witness
            .last()
            .ok_or_else(|| Error::MalformedInput("p2wsh input has no witness".to_string()))?;
        Script::parse_raw(last)
    }

    /// Verify the whole transaction: fee sanity plus every input.
    pub fn verify(&self, resolver: &dyn OutputResolver) -> Result<bool> {
        self.fee(resolver)?;
        for i in 0..self.inputs.len() {
            if !self.verify_input(i, resolver)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Sign one legacy input with SIGHASH_ALL, installing
    /// `<der-sig+hashtype> <sec-pubkey>` as the ScriptSig.
    pub fn sign_input(
        &mut self,
        input_index: usize,
        key: &PrivateKey,
        compressed: bool,
        resolver: &dyn OutputResolver,
    ) -> Result<()> {
        let z = self.sighash(input_index, resolver)?;
        let sig = key.sign(&BigInt::from_bytes_be(Sign::Plus, &z))?;

        let mut sig_bytes = sig.serialize_der();
        sig_bytes.push(SIGHASH_ALL as u8);
        let sec = key.public_key().serialize_sec(compressed);

        self.inputs[input_index].script_sig = ScriptSig::Script(Script::new(vec![
            ScriptCommand::Data(sig_bytes),
            ScriptCommand::Data(sec),
        ]));
        self.invalidate_caches();
        Ok(())
    }

    /// Sign every input with the same key.
    pub fn sign_inputs(
        &mut self,
        key: &PrivateKey,
        compressed: bool,
        resolver: &dyn OutputResolver,
    ) -> Result<()> {
        for i in 0..self.inputs.len() {
            self.sign_input(i, key, compressed, resolver)?;
        }
        Ok(())
    }
}
