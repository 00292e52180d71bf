use alloy_primitives::B256;
use beacon_engine_client::{EngineClientError, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionEngineError {
    /// The execution client rejected the block as invalid. The caller has to find a valid
    /// ancestor and recover from there.
    #[error("bad block produced (latest valid hash {latest_valid_hash:?})")]
    BadBlockProduced { latest_valid_hash: Option<B256> },

    /// One of the enumerated JSON-RPC error codes.
    #[error("predefined JSON-RPC error: {0}")]
    PreDefinedJsonRpc(#[source] ProtocolError),

    /// The request failed local checks and was never sent.
    #[error("invalid new payload request: {0}")]
    InvalidRequest(#[from] PayloadVerificationError),

    #[error(transparent)]
    Client(#[from] EngineClientError),
}

/// A new payload request whose contents do not agree with each other.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadVerificationError {
    #[error("invalid transaction {index}: {reason}")]
    InvalidTransaction { index: usize, reason: String },

    #[error("mismatched number of versioned hashes, expected {expected} got {actual}")]
    VersionedHashCount { expected: usize, actual: usize },

    #[error("versioned hash {index} mismatch, expected {expected} got {actual}")]
    VersionedHashMismatch {
        index: usize,
        expected: B256,
        actual: B256,
    },

    /// The payload could not be turned into a block header.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("block hash mismatch, payload claims {claimed} computed {computed}")]
    BlockHashMismatch { claimed: B256, computed: B256 },
}

impl ExecutionEngineError {
    pub fn is_fatal(&self) -> bool {
        match self {
            ExecutionEngineError::BadBlockProduced { .. }
            | ExecutionEngineError::InvalidRequest(_) => false,
            ExecutionEngineError::PreDefinedJsonRpc(_) => true,
            ExecutionEngineError::Client(err) => err.is_fatal(),
        }
    }

    pub fn is_bad_block(&self) -> bool {
        matches!(self, ExecutionEngineError::BadBlockProduced { .. })
    }

    /// The underlying client error, if it was passed through.
    pub fn as_client(&self) -> Option<&EngineClientError> {
        match self {
            ExecutionEngineError::Client(err) => Some(err),
            _ => None,
        }
    }
}

pub type ExecutionEngineResult<T> = Result<T, ExecutionEngineError>;
