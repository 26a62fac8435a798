//! # lightpeer
//!
//! The core of a validating, non-mining Bitcoin peer: wire codecs, the
//! script virtual machine, transaction authentication over secp256k1,
//! and the light-client filter engines (BIP 37 bloom filters, BIP 157/158
//! compact filters) plus BIP 152 compact block relay.
//!
//! ## Architecture
//!
//! The crate is a library of pure, reentrant codecs and validators; all
//! I/O lives behind the collaborator traits ([`tx::OutputResolver`],
//! [`envelope::Message`]) and the bounded queues in [`queue`]. Modules
//! are layered bottom-up:
//!
//! - arithmetic and curve: [`field`], [`point`], [`signature`], [`keys`]
//! - primitives: [`hashes`], [`varint`], [`bitstream`], [`base58`], [`bech32`]
//! - consensus objects: [`script`], [`engine`], [`tx`], [`merkle`], [`block`]
//! - light-client filters: [`bloom`], [`gcs`]
//! - wire: [`envelope`], [`messages`], [`merkleblock`], [`cfilter`],
//!   [`compact`], [`mempool`], [`queue`]
//!
//! ## Usage
//!
//! ```rust
//! use lightpeer::varint::{encode_varint, read_varint};
//! use std::io::Cursor;
//!
//! let bytes = encode_varint(515);
//! assert_eq!(read_varint(&mut Cursor::new(bytes)).unwrap(), 515);
//! ```

pub mod base58;
pub mod bech32;
pub mod bitstream;
pub mod block;
pub mod bloom;
pub mod cfilter;
pub mod compact;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod field;
pub mod gcs;
pub mod hashes;
pub mod keys;
pub mod mempool;
pub mod merkle;
pub mod merkleblock;
pub mod messages;
pub mod point;
pub mod queue;
pub mod script;
pub mod signature;
pub mod tx;
pub mod varint;

pub use block::{Block, BlockHeader};
pub use bloom::BloomFilter;
pub use compact::{reconstruct_block, CompactBlockMessage, ReconstructedBlock};
pub use engine::ScriptEngine;
pub use envelope::{Message, NetworkEnvelope};
pub use error::{Error, Result};
pub use gcs::GolombCodedSet;
pub use keys::PrivateKey;
pub use mempool::Mempool;
pub use merkleblock::MerkleBlock;
pub use point::Point;
pub use script::{Script, ScriptCommand};
pub use signature::Signature;
pub use tx::{OutputResolver, ScriptSig, Transaction, TxIn, TxOut};
