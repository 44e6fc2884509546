//! error types for vaultzero

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // === envelope errors ===
    #[error("malformed envelope: {len} bytes, need at least {min}")]
    MalformedEnvelope { len: usize, min: usize },

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// authentication failed - wrong passphrase and modified bytes look the same
    #[error("tamper detected: envelope failed authentication")]
    TamperDetected,

    // === secret sharing errors ===
    #[error("invalid secret length: {len} bytes, max {max}")]
    InvalidSecretLength { len: usize, max: usize },

    #[error("invalid sharing scheme: threshold {threshold} of {shares}")]
    InvalidScheme { threshold: usize, shares: usize },

    #[error("reconstruction error: {0}")]
    Reconstruction(String),

    #[error("invalid share format")]
    InvalidShareFormat,

    // === quorum errors ===
    #[error("missing shards detected: node(s) {}", .0.join(", "))]
    MissingShards(Vec<String>),

    #[error("quorum failure: only {online} nodes online, need {need}")]
    QuorumFailure { online: usize, need: usize },

    #[error("partial write: {written} nodes written, {failed} failed")]
    PartialWrite { written: usize, failed: usize },

    #[error("grid offline: no live nodes")]
    GridOffline,

    // === access errors ===
    #[error("access denied")]
    AccessDenied,

    #[error("invalid passphrase length: {len} (must be 1-{max})")]
    InvalidPassphrase { len: usize, max: usize },

    // === asset + storage errors ===
    #[error("invalid asset name: {0:?}")]
    InvalidAssetName(String),

    #[error("asset not found: {0}")]
    AssetNotFound(String),

    #[error("ciphertext unavailable for asset {0}")]
    CiphertextUnavailable(String),

    #[error("unknown node index {index} (grid has {nodes} nodes)")]
    UnknownNode { index: usize, nodes: usize },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Storage(format!("sled: {}", e))
    }
}
