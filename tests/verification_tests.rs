//! End-to-end transaction authentication across the four spending
//! templates

use lightpeer::error::{Error, Result};
use lightpeer::hashes::hash160;
use lightpeer::keys::PrivateKey;
use lightpeer::script::{
    p2pkh_script, p2wpkh_script, Script, ScriptCommand, OP_0, OP_CHECKMULTISIG, OP_CHECKSIG,
    OP_EQUAL, OP_HASH160, OP_1,
};
use lightpeer::tx::{OutputResolver, ScriptSig, Transaction, TxIn, TxOut};
use num_bigint::{BigInt, Sign};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Cursor;

/// Test-fixture resolver backed by a map of outpoints.
#[derive(Default)]
struct LocalResolver {
    outputs: HashMap<([u8; 32], u32), TxOut>,
}

impl LocalResolver {
    fn insert(&mut self, txid: [u8; 32], index: u32, output: TxOut) {
        self.outputs.insert((txid, index), output);
    }
}

impl OutputResolver for LocalResolver {
    fn resolve(&self, prev_txid: &[u8; 32], prev_index: u32, _testnet: bool) -> Result<TxOut> {
        self.outputs
            .get(&(*prev_txid, prev_index))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{}:{}", hex::encode(prev_txid), prev_index)))
    }
}

fn spending_tx(funding_txid: [u8; 32]) -> Transaction {
    let input = TxIn::new(funding_txid, 0, 0xffff_fffe);
    let output = TxOut::new(90_000, p2pkh_script(&[0x42; 20]));
    Transaction::new(1, vec![input], vec![output], 0, false, false)
}

// ============================================================================
// P2PKH
// ============================================================================

#[test]
fn test_p2pkh_sign_and_verify() {
    let key = PrivateKey::from_u64(0xdead_beef_0001);
    let pubkey_hash = hash160(&key.public_key().serialize_sec(true));

    let mut resolver = LocalResolver::default();
    let funding_txid = [0x51; 32];
    resolver.insert(funding_txid, 0, TxOut::new(100_000, p2pkh_script(&pubkey_hash)));

    let mut tx = spending_tx(funding_txid);
    tx.sign_input(0, &key, true, &resolver).unwrap();
    assert!(tx.verify(&resolver).unwrap());
}

#[test]
fn test_p2pkh_wrong_key_fails() {
    let key = PrivateKey::from_u64(0xdead_beef_0001);
    let other = PrivateKey::from_u64(0xdead_beef_0002);
    let pubkey_hash = hash160(&key.public_key().serialize_sec(true));

    let mut resolver = LocalResolver::default();
    let funding_txid = [0x52; 32];
    resolver.insert(funding_txid, 0, TxOut::new(100_000, p2pkh_script(&pubkey_hash)));

    let mut tx = spending_tx(funding_txid);
    tx.sign_input(0, &other, true, &resolver).unwrap();
    assert!(!tx.verify(&resolver).unwrap());
}

#[test]
fn test_p2pkh_signature_mutation_fails() {
    let key = PrivateKey::from_u64(0xdead_beef_0003);
    let pubkey_hash = hash160(&key.public_key().serialize_sec(true));

    let mut resolver = LocalResolver::default();
    let funding_txid = [0x53; 32];
    resolver.insert(funding_txid, 0, TxOut::new(100_000, p2pkh_script(&pubkey_hash)));

    let mut tx = spending_tx(funding_txid);
    tx.sign_input(0, &key, true, &resolver).unwrap();
    assert!(tx.verify_input(0, &resolver).unwrap());

    // flip one byte in the middle of the DER signature
    let script = tx.inputs[0].script_sig.script().unwrap().clone();
    let mut cmds = script.cmds;
    if let ScriptCommand::Data(sig) = &mut cmds[0] {
        let mid = sig.len() / 2;
        sig[mid] ^= 0x01;
    }
    tx.inputs[0].script_sig = ScriptSig::Script(Script::new(cmds));
    tx.invalidate_caches();
    assert!(!tx.verify_input(0, &resolver).unwrap());
}

#[test]
fn test_negative_fee_rejected() {
    let key = PrivateKey::from_u64(0xdead_beef_0004);
    let pubkey_hash = hash160(&key.public_key().serialize_sec(true));

    let mut resolver = LocalResolver::default();
    let funding_txid = [0x54; 32];
    resolver.insert(funding_txid, 0, TxOut::new(10_000, p2pkh_script(&pubkey_hash)));

    // output exceeds the funding amount
    let mut tx = spending_tx(funding_txid);
    tx.sign_input(0, &key, true, &resolver).unwrap();
    assert!(matches!(tx.verify(&resolver), Err(Error::NegativeFee(_))));
}

// ============================================================================
// P2SH
// ============================================================================

#[test]
fn test_p2sh_one_of_one_multisig() {
    let key = PrivateKey::from_u64(0xdead_beef_0005);
    let sec = key.public_key().serialize_sec(true);

    // redeem script: 1 <pubkey> 1 OP_CHECKMULTISIG
    let redeem = Script::new(vec![
        ScriptCommand::Op(OP_1),
        ScriptCommand::Data(sec),
        ScriptCommand::Op(OP_1),
        ScriptCommand::Op(OP_CHECKMULTISIG),
    ]);
    let redeem_raw = redeem.raw_serialize();
    let redeem_hash = hash160(&redeem_raw);

    let script_pubkey = Script::new(vec![
        ScriptCommand::Op(OP_HASH160),
        ScriptCommand::Data(redeem_hash.to_vec()),
        ScriptCommand::Op(OP_EQUAL),
    ]);

    let mut resolver = LocalResolver::default();
    let funding_txid = [0x55; 32];
    resolver.insert(funding_txid, 0, TxOut::new(100_000, script_pubkey));

    let mut tx = spending_tx(funding_txid);

    // sighash uses the redeem script, so it must be in place before signing
    tx.inputs[0].script_sig = ScriptSig::Script(Script::new(vec![
        ScriptCommand::Data(redeem_raw.clone()),
    ]));
    let z = tx.sighash(0, &resolver).unwrap();
    let sig = key.sign(&BigInt::from_bytes_be(Sign::Plus, &z)).unwrap();
    let mut sig_bytes = sig.serialize_der();
    sig_bytes.push(0x01);

    tx.inputs[0].script_sig = ScriptSig::Script(Script::new(vec![
        ScriptCommand::Op(OP_0), // CHECKMULTISIG off-by-one filler
        ScriptCommand::Data(sig_bytes),
        ScriptCommand::Data(redeem_raw),
    ]));
    tx.invalidate_caches();

    assert!(tx.verify_input(0, &resolver).unwrap());
}

#[test]
fn test_p2sh_wrong_redeem_script_fails() {
    let key = PrivateKey::from_u64(0xdead_beef_0006);
    let sec = key.public_key().serialize_sec(true);
    let redeem = Script::new(vec![ScriptCommand::Data(sec), ScriptCommand::Op(OP_CHECKSIG)]);
    let redeem_hash = hash160(&redeem.raw_serialize());

    let script_pubkey = Script::new(vec![
        ScriptCommand::Op(OP_HASH160),
        ScriptCommand::Data(redeem_hash.to_vec()),
        ScriptCommand::Op(OP_EQUAL),
    ]);

    let mut resolver = LocalResolver::default();
    let funding_txid = [0x56; 32];
    resolver.insert(funding_txid, 0, TxOut::new(100_000, script_pubkey));

    let mut tx = spending_tx(funding_txid);
    // script-sig carries a redeem script whose hash does not match
    let wrong_redeem = Script::new(vec![ScriptCommand::Op(OP_1)]);
    tx.inputs[0].script_sig = ScriptSig::Script(Script::new(vec![
        ScriptCommand::Data(vec![0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01, 0x01]),
        ScriptCommand::Data(wrong_redeem.raw_serialize()),
    ]));

    assert!(!tx.verify_input(0, &resolver).unwrap());
}

// ============================================================================
// Native SegWit
// ============================================================================

#[test]
fn test_p2wpkh_witness_verify() {
    let key = PrivateKey::from_u64(0xdead_beef_0007);
    let sec = key.public_key().serialize_sec(true);
    let pubkey_hash = hash160(&sec);

    let mut resolver = LocalResolver::default();
    let funding_txid = [0x57; 32];
    resolver.insert(funding_txid, 0, TxOut::new(100_000, p2wpkh_script(&pubkey_hash)));

    let mut tx = spending_tx(funding_txid);
    tx.segwit = true;

    let z = tx.sighash_bip143(0, None, None, &resolver).unwrap();
    let sig = key.sign(&BigInt::from_bytes_be(Sign::Plus, &z)).unwrap();
    let mut sig_bytes = sig.serialize_der();
    sig_bytes.push(0x01);
    tx.inputs[0].witness = vec![sig_bytes, sec];

    assert!(tx.verify_input(0, &resolver).unwrap());
}

#[test]
fn test_p2wsh_witness_script_verify() {
    let key = PrivateKey::from_u64(0xdead_beef_0008);
    let sec = key.public_key().serialize_sec(true);

    // witness script: <pubkey> OP_CHECKSIG
    let witness_script = Script::new(vec![
        ScriptCommand::Data(sec),
        ScriptCommand::Op(OP_CHECKSIG),
    ]);
    let ws_raw = witness_script.raw_serialize();
    let ws_hash: [u8; 32] = Sha256::digest(&ws_raw).into();

    let script_pubkey = Script::new(vec![
        ScriptCommand::Op(OP_0),
        ScriptCommand::Data(ws_hash.to_vec()),
    ]);

    let mut resolver = LocalResolver::default();
    let funding_txid = [0x58; 32];
    resolver.insert(funding_txid, 0, TxOut::new(100_000, script_pubkey));

    let mut tx = spending_tx(funding_txid);
    tx.segwit = true;

    let z = tx.sighash_bip143(0, None, Some(&witness_script), &resolver).unwrap();
    let sig = key.sign(&BigInt::from_bytes_be(Sign::Plus, &z)).unwrap();
    let mut sig_bytes = sig.serialize_der();
    sig_bytes.push(0x01);
    tx.inputs[0].witness = vec![sig_bytes, ws_raw];

    assert!(tx.verify_input(0, &resolver).unwrap());
}

#[test]
fn test_nested_p2sh_p2wpkh_verify() {
    let key = PrivateKey::from_u64(0xdead_beef_0009);
    let sec = key.public_key().serialize_sec(true);
    let pubkey_hash = hash160(&sec);

    // redeem script is the witness program
    let redeem = p2wpkh_script(&pubkey_hash);
    let redeem_raw = redeem.raw_serialize();
    let redeem_hash = hash160(&redeem_raw);

    let script_pubkey = Script::new(vec![
        ScriptCommand::Op(OP_HASH160),
        ScriptCommand::Data(redeem_hash.to_vec()),
        ScriptCommand::Op(OP_EQUAL),
    ]);

    let mut resolver = LocalResolver::default();
    let funding_txid = [0x59; 32];
    resolver.insert(funding_txid, 0, TxOut::new(100_000, script_pubkey));

    let mut tx = spending_tx(funding_txid);
    tx.segwit = true;
    tx.inputs[0].script_sig =
        ScriptSig::Script(Script::new(vec![ScriptCommand::Data(redeem_raw)]));

    let z = tx.sighash_bip143(0, Some(&redeem), None, &resolver).unwrap();
    let sig = key.sign(&BigInt::from_bytes_be(Sign::Plus, &z)).unwrap();
    let mut sig_bytes = sig.serialize_der();
    sig_bytes.push(0x01);
    tx.inputs[0].witness = vec![sig_bytes, sec];

    assert!(tx.verify_input(0, &resolver).unwrap());
}

// ============================================================================
// BIP 143 official P2WPKH vector
// ============================================================================

const BIP143_UNSIGNED_TX: &str = "0100000002fff7f7881a8099afa6940d42d1e7f6362bea4cbc64f69dc217b33c8d5dbbf17b0000000000eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac11000000";

fn bip143_fixture() -> (Transaction, LocalResolver) {
    let raw = hex::decode(BIP143_UNSIGNED_TX).unwrap();
    let tx = Transaction::parse(&mut Cursor::new(&raw), false).unwrap();

    let program = hex::decode("1d0f172a0ecb48aee1be1f2687d2963ae33f71a1").unwrap();
    let mut resolver = LocalResolver::default();
    resolver.insert(
        tx.inputs[1].prev_tx,
        tx.inputs[1].prev_index,
        TxOut::new(600_000_000, p2wpkh_script(&program)),
    );
    (tx, resolver)
}

#[test]
fn test_bip143_p2wpkh_sighash_vector() {
    let (tx, resolver) = bip143_fixture();
    let z = tx.sighash_bip143(1, None, None, &resolver).unwrap();
    assert_eq!(
        hex::encode(z),
        "c37af31116d1b27caf68aae9e3ac82f1477929014d5b917657d0eb49478cb670"
    );
}

#[test]
fn test_bip143_vector_key_material() {
    let secret = BigInt::from_bytes_be(
        Sign::Plus,
        &hex::decode("619c335025c7f4012e556c2a58b2506e30b8511b53ade95ea316fd8c3286feb9").unwrap(),
    );
    let key = PrivateKey::new(secret).unwrap();
    assert_eq!(
        hex::encode(key.public_key().serialize_sec(true)),
        "025476c2e83188368da1ff3e292e7acafcdb3566bb0ad253f62fc70f07aeee6357"
    );
}

#[test]
fn test_bip143_vector_signature_verifies() {
    let (mut tx, resolver) = bip143_fixture();

    let mut sig = hex::decode(
        "304402203609e17b84f6a7d30c80bfa610b5b4542f32a8a0d5447a12fb1366d7f01cc44a0220573a954c4518331561406f90300e8f3358f51928d43c212a8caed02de67eebee",
    )
    .unwrap();
    sig.push(0x01);
    let pubkey =
        hex::decode("025476c2e83188368da1ff3e292e7acafcdb3566bb0ad253f62fc70f07aeee6357").unwrap();

    tx.segwit = true;
    tx.inputs[1].witness = vec![sig, pubkey];
    assert!(tx.verify_input(1, &resolver).unwrap());
}

#[test]
fn test_bip143_vector_mutated_signature_fails() {
    let (mut tx, resolver) = bip143_fixture();

    let mut sig = hex::decode(
        "304402203609e17b84f6a7d30c80bfa610b5b4542f32a8a0d5447a12fb1366d7f01cc44a0220573a954c4518331561406f90300e8f3358f51928d43c212a8caed02de67eebee",
    )
    .unwrap();
    sig[20] ^= 0x01;
    sig.push(0x01);
    let pubkey =
        hex::decode("025476c2e83188368da1ff3e292e7acafcdb3566bb0ad253f62fc70f07aeee6357").unwrap();

    tx.segwit = true;
    tx.inputs[1].witness = vec![sig, pubkey];
    assert!(!tx.verify_input(1, &resolver).unwrap());
}

// ============================================================================
// BIP 143 official P2SH-P2WPKH (nested SegWit) vector
// ============================================================================

const BIP143_NESTED_UNSIGNED_TX: &str = "0100000001db6b1b20aa0fd7b23880be2ecbd4a98130974cf4748fb66092ac4d3ceb1a5477010000000000feffffff02b8b4eb0b000000001976a914a457b684d7f0d539a46a45bbc043f35b59d0d96388ac0008af2f000000001976a914fd270b1ee6abcaea97fea7ad0402e8bd8ad6d77c88ac92040000";

/// The witness program wrapped by the P2SH funding output.
const BIP143_NESTED_REDEEM: &str = "001479091972186c449eb1ded22b78e40d009bdf0089";

fn bip143_nested_fixture() -> (Transaction, LocalResolver) {
    let raw = hex::decode(BIP143_NESTED_UNSIGNED_TX).unwrap();
    let tx = Transaction::parse(&mut Cursor::new(&raw), false).unwrap();

    // funding output: 10 BTC to OP_HASH160 4733f37c... OP_EQUAL
    let funding_script =
        Script::parse_raw(&hex::decode("a9144733f37cf4db86fbc2efed2500b4f4e49f31202387").unwrap())
            .unwrap();
    let mut resolver = LocalResolver::default();
    resolver.insert(
        tx.inputs[0].prev_tx,
        tx.inputs[0].prev_index,
        TxOut::new(1_000_000_000, funding_script),
    );
    (tx, resolver)
}

#[test]
fn test_bip143_nested_sighash_vector() {
    let (tx, resolver) = bip143_nested_fixture();
    let redeem = Script::parse_raw(&hex::decode(BIP143_NESTED_REDEEM).unwrap()).unwrap();
    assert!(redeem.is_p2wpkh_script_pubkey());

    let z = tx.sighash_bip143(0, Some(&redeem), None, &resolver).unwrap();
    assert_eq!(
        hex::encode(z),
        "64f3b0f4dd2bb3aa1ce8566d220cc74dda9df97d8490cc81d89d735c92e59fb6"
    );
}

#[test]
fn test_bip143_nested_key_material() {
    let secret = BigInt::from_bytes_be(
        Sign::Plus,
        &hex::decode("eb696a065ef48a2192da5b28b694f87544b30fae8327c4510137a922f32c6dcf").unwrap(),
    );
    let key = PrivateKey::new(secret).unwrap();
    assert_eq!(
        hex::encode(key.public_key().serialize_sec(true)),
        "03ad1d8e89212f0b92c74d23bb710c00662ad1470198ac48c43f7d6f93a2a26873"
    );
    // the redeem script commits to hash160 of this pubkey
    assert_eq!(
        hex::encode(hash160(&key.public_key().serialize_sec(true))),
        "79091972186c449eb1ded22b78e40d009bdf0089"
    );
}

#[test]
fn test_bip143_nested_signature_verifies() {
    let (mut tx, resolver) = bip143_nested_fixture();
    let redeem_raw = hex::decode(BIP143_NESTED_REDEEM).unwrap();

    let mut sig = hex::decode(
        "3044022047ac8e878352d3ebbde1c94ce3a10d057c24175747116f8288e5d794d12d482f0220217f36a485cae903c713331d877c1f64677e3622ad4010726870540656fe9dcb",
    )
    .unwrap();
    sig.push(0x01);
    let pubkey =
        hex::decode("03ad1d8e89212f0b92c74d23bb710c00662ad1470198ac48c43f7d6f93a2a26873").unwrap();

    // the signed form per the vector: scriptSig pushes the redeem script,
    // the witness carries signature and pubkey
    tx.segwit = true;
    tx.inputs[0].script_sig =
        ScriptSig::Script(Script::new(vec![ScriptCommand::Data(redeem_raw)]));
    tx.inputs[0].witness = vec![sig, pubkey];
    tx.invalidate_caches();

    assert!(tx.verify_input(0, &resolver).unwrap());
}

#[test]
fn test_bip143_nested_mutated_signature_fails() {
    let (mut tx, resolver) = bip143_nested_fixture();
    let redeem_raw = hex::decode(BIP143_NESTED_REDEEM).unwrap();

    let mut sig = hex::decode(
        "3044022047ac8e878352d3ebbde1c94ce3a10d057c24175747116f8288e5d794d12d482f0220217f36a485cae903c713331d877c1f64677e3622ad4010726870540656fe9dcb",
    )
    .unwrap();
    sig[15] ^= 0x01;
    sig.push(0x01);
    let pubkey =
        hex::decode("03ad1d8e89212f0b92c74d23bb710c00662ad1470198ac48c43f7d6f93a2a26873").unwrap();

    tx.segwit = true;
    tx.inputs[0].script_sig =
        ScriptSig::Script(Script::new(vec![ScriptCommand::Data(redeem_raw)]));
    tx.inputs[0].witness = vec![sig, pubkey];
    tx.invalidate_caches();

    assert!(!tx.verify_input(0, &resolver).unwrap());
}

#[test]
fn test_missing_prevout_is_not_found() {
    let resolver = LocalResolver::default();
    let tx = spending_tx([0x00; 32]);
    assert!(matches!(
        tx.verify_input(0, &resolver),
        Err(Error::NotFound(_))
    ));
}
