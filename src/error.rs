use thiserror::Error;

use crate::schemas::BlockId;

pub type OracleResult<T> = std::result::Result<T, OracleError>;

/// Failures of the key-value layer underneath the block store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("rocksdb: {0}")]
    Rocks(#[from] rocksdb::Error),
    #[error("store backend: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("no mirrored block with id {0}")]
    BlockNotFound(BlockId),
    #[error("no mirrored block at source height {0}")]
    HeightNotFound(u64),
    #[error("last accepted block has never been set")]
    StateUninitialized,
    #[error(
        "source block {height} exists but is not final yet (head {head}, needs {depth} confirmations)"
    )]
    NotYetConfirmed { height: u64, head: u64, depth: u64 },
    #[error("source chain {method} failed: {reason}")]
    FetchFailed { method: &'static str, reason: String },
    #[error("mirrored block {id} at height {height} is corrupt: {reason}")]
    DataIntegrity { id: BlockId, height: u64, reason: String },
    #[error("envelope codec: {0}")]
    Codec(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("mempool is full ({0} pending payloads)")]
    MempoolFull(usize),
    #[error("genesis data must be at most {max} bytes, got {len}")]
    BadGenesis { len: usize, max: usize },
    #[error("operation cancelled")]
    Cancelled,
}

impl OracleError {
    pub fn fetch_failed(method: &'static str, reason: impl ToString) -> Self {
        OracleError::FetchFailed { method, reason: reason.to_string() }
    }

    /// True for both "no such id" and "no such height".
    pub fn is_not_found(&self) -> bool {
        matches!(self, OracleError::BlockNotFound(_) | OracleError::HeightNotFound(_))
    }

    /// Stable numeric code used by the JSON-RPC surface.
    pub fn rpc_code(&self) -> i64 {
        match self {
            OracleError::BlockNotFound(_) | OracleError::HeightNotFound(_) => -32001,
            OracleError::StateUninitialized => -32002,
            OracleError::NotYetConfirmed { .. } => -32003,
            OracleError::FetchFailed { .. } => -32004,
            OracleError::DataIntegrity { .. } => -32005,
            OracleError::MempoolFull(_) => -32006,
            OracleError::Cancelled => -32007,
            OracleError::BadGenesis { .. } => -32602,
            OracleError::Codec(_) | OracleError::Storage(_) => -32603,
        }
    }
}

impl From<rocksdb::Error> for OracleError {
    fn from(e: rocksdb::Error) -> Self {
        OracleError::Storage(StoreError::Rocks(e))
    }
}
