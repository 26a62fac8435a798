//! Error types shared across the peer core

use thiserror::Error;

/// Closed taxonomy of failures the core can produce.
///
/// Script and signature outcomes are boolean verdicts, never errors; only
/// protocol parsing and resource acquisition surface through this enum.
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("point is not on the secp256k1 curve: {0}")]
    CurveViolation(String),

    #[error("invalid signature: {0}")]
    SignatureInvalid(String),

    #[error("script execution failed: {0}")]
    ScriptFailed(String),

    #[error("cannot recover p2sh redeem script: {0}")]
    MalformedP2sh(String),

    #[error("outputs exceed inputs: {0}")]
    NegativeFee(String),

    #[error("proof of work does not meet target")]
    BadProofOfWork,

    #[error("reconstructed merkle root does not match header")]
    BadMerkleRoot,

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    NetworkError(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::MalformedInput(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
