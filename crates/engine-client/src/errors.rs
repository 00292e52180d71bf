//! Error taxonomy of the engine client and the classifier that produces it.

use alloy_primitives::B256;
use thiserror::Error;

use crate::transport::TransportError;

/// Structured JSON-RPC error, keyed purely on the numeric code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// -32700
    #[error("invalid JSON was received by the server")]
    Parse,

    /// -32600
    #[error("JSON sent is not a valid request object")]
    InvalidRequest,

    /// -32601
    #[error("method not found")]
    MethodNotFound,

    /// -32602
    #[error("invalid method parameter(s)")]
    InvalidParams,

    /// -32603
    #[error("internal JSON-RPC error")]
    Internal,

    /// -38001
    #[error("payload does not exist / is not available")]
    UnknownPayload,

    /// -38002
    #[error("forkchoice state is invalid / inconsistent")]
    InvalidForkchoiceState,

    /// -38003
    #[error("payload attributes are invalid / inconsistent")]
    InvalidPayloadAttributes,

    /// -38004
    #[error("number of requested entities is too large")]
    RequestTooLarge,

    /// -32000, server message passed through.
    #[error("internal server error: {0}")]
    InternalServer(String),

    /// Any other code, passed through unmodified.
    #[error("rpc error {code}: {message}")]
    Unrecognized { code: i32, message: String },
}

impl ProtocolError {
    pub fn from_code(code: i32, message: impl Into<String>) -> Self {
        match code {
            -32700 => ProtocolError::Parse,
            -32600 => ProtocolError::InvalidRequest,
            -32601 => ProtocolError::MethodNotFound,
            -32602 => ProtocolError::InvalidParams,
            -32603 => ProtocolError::Internal,
            -38001 => ProtocolError::UnknownPayload,
            -38002 => ProtocolError::InvalidForkchoiceState,
            -38003 => ProtocolError::InvalidPayloadAttributes,
            -38004 => ProtocolError::RequestTooLarge,
            -32000 => ProtocolError::InternalServer(message.into()),
            code => ProtocolError::Unrecognized {
                code,
                message: message.into(),
            },
        }
    }

    /// Numeric code of the error.
    pub fn code(&self) -> i32 {
        match self {
            ProtocolError::Parse => -32700,
            ProtocolError::InvalidRequest => -32600,
            ProtocolError::MethodNotFound => -32601,
            ProtocolError::InvalidParams => -32602,
            ProtocolError::Internal => -32603,
            ProtocolError::UnknownPayload => -38001,
            ProtocolError::InvalidForkchoiceState => -38002,
            ProtocolError::InvalidPayloadAttributes => -38003,
            ProtocolError::RequestTooLarge => -38004,
            ProtocolError::InternalServer(_) => -32000,
            ProtocolError::Unrecognized { code, .. } => *code,
        }
    }

    /// Whether this is one of the enumerated codes rather than a passthrough.
    pub fn is_predefined(&self) -> bool {
        !matches!(self, ProtocolError::Unrecognized { .. })
    }
}

/// Failure while establishing the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Dial or chain id query failed before a response was received.
    #[error("transport: {0}")]
    Transport(TransportError),

    #[error("wrong chain id, expected {expected} got {actual}")]
    ChainIdMismatch { expected: u64, actual: u64 },

    #[error("capability exchange failed: {0}")]
    CapabilityExchange(TransportError),
}

/// Non-VALID payload status reported by the execution client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadStatusError {
    #[error("payload status is SYNCING")]
    Syncing,

    #[error("payload status is ACCEPTED")]
    Accepted,

    /// INVALID or INVALID_BLOCK_HASH.
    #[error("payload status is INVALID (latest valid hash {latest_valid_hash:?})")]
    Invalid {
        latest_valid_hash: Option<B256>,
        validation_error: Option<String>,
    },

    #[error("payload status is unknown")]
    Unknown,
}

/// Internally inconsistent response from the execution client.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("nil payload id on VALID response with payload attributes")]
    NilPayloadIdOnValidResponse,

    #[error("nil forkchoice response")]
    NilForkchoiceResponse,

    #[error("nil payload status")]
    NilPayloadStatus,

    #[error("nil execution payload envelope")]
    NilExecutionPayloadEnvelope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Locally imposed per-call deadline.
    EngineApi,
    /// Network-level timeout from the HTTP client.
    Http,
}

/// How a caller should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fatality {
    /// Misconfiguration or broken counterpart; never retry.
    Fatal,
    /// Transient; retrying is the caller's choice.
    NonFatal,
    /// Caller must decide explicitly; never auto-retried.
    Undefined,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineClientError {
    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),

    #[error("timeout ({0:?})")]
    Timeout(TimeoutKind),

    /// Authorization rejected or token could not be produced.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Failure that could not be parsed as a structured protocol error.
    #[error("bad connection: {0}")]
    BadConnection(String),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    PayloadStatus(#[from] PayloadStatusError),

    #[error("contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),

    #[error("cancelled")]
    Cancelled,
}

impl EngineClientError {
    /// Bucket this error falls in. Every variant and protocol code is listed explicitly.
    pub fn fatality(&self) -> Fatality {
        match self {
            EngineClientError::Timeout(TimeoutKind::EngineApi | TimeoutKind::Http) => {
                Fatality::NonFatal
            }
            EngineClientError::BadConnection(_)
            | EngineClientError::Unauthorized(_)
            | EngineClientError::ContractViolation(_) => Fatality::Fatal,
            EngineClientError::Protocol(p) => match p {
                ProtocolError::Parse
                | ProtocolError::InvalidRequest
                | ProtocolError::MethodNotFound
                | ProtocolError::InvalidParams
                | ProtocolError::Internal
                | ProtocolError::UnknownPayload
                | ProtocolError::InvalidForkchoiceState
                | ProtocolError::InvalidPayloadAttributes
                | ProtocolError::RequestTooLarge
                | ProtocolError::InternalServer(_) => Fatality::Fatal,
                ProtocolError::Unrecognized { .. } => Fatality::Undefined,
            },
            EngineClientError::Connection(_)
            | EngineClientError::PayloadStatus(_)
            | EngineClientError::Cancelled => Fatality::Undefined,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatality() == Fatality::Fatal
    }

    pub fn is_non_fatal(&self) -> bool {
        self.fatality() == Fatality::NonFatal
    }

    /// Whether this carries one of the enumerated JSON-RPC error codes.
    pub fn is_predefined_json_rpc(&self) -> bool {
        matches!(self, EngineClientError::Protocol(p) if p.is_predefined())
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, EngineClientError::Unauthorized(_))
    }

    /// The protocol error, if any.
    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            EngineClientError::Protocol(p) => Some(p),
            _ => None,
        }
    }
}

/// Translates a transport failure into the domain taxonomy.
///
/// Order matters: local deadline, network timeout, authorization, unparseable failure, then
/// the structured code table. Translation only, nothing is retried here.
pub fn classify(err: TransportError) -> EngineClientError {
    match err {
        TransportError::Deadline => EngineClientError::Timeout(TimeoutKind::EngineApi),
        TransportError::HttpTimeout => EngineClientError::Timeout(TimeoutKind::Http),
        TransportError::Unauthorized(msg) | TransportError::Auth(msg) => {
            EngineClientError::Unauthorized(msg)
        }
        TransportError::Connection(msg) | TransportError::Decode(msg) => {
            EngineClientError::BadConnection(msg)
        }
        TransportError::Rpc { code, message, .. } => {
            EngineClientError::Protocol(ProtocolError::from_code(code, message))
        }
    }
}

pub type EngineClientResult<T> = Result<T, EngineClientError>;
