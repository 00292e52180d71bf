//! Engine API wire types.
//!
//! Payloads and forkchoice state come from `alloy-rpc-types-engine`. The payload status and
//! forkchoice response are defined here because alloy's `PayloadStatusEnum` rejects status
//! strings it does not know, while this client maps them to [`PayloadStatusKind::Unknown`].

use alloy_primitives::B256;
pub use alloy_rpc_types_engine::{
    BlobsBundleV1, ExecutionPayloadEnvelopeV3, ExecutionPayloadV3, ForkchoiceState,
    PayloadAttributes, PayloadId,
};
use serde::{Deserialize, Serialize};

/// Engine API method names.
pub mod methods {
    pub const CHAIN_ID: &str = "eth_chainId";
    pub const EXCHANGE_CAPABILITIES: &str = "engine_exchangeCapabilities";
    pub const NEW_PAYLOAD_V3: &str = "engine_newPayloadV3";
    pub const FORKCHOICE_UPDATED_V3: &str = "engine_forkchoiceUpdatedV3";
    pub const GET_PAYLOAD_V3: &str = "engine_getPayloadV3";
}

/// Capabilities this client advertises during capability exchange.
pub const SUPPORTED_CAPABILITIES: &[&str] = &[
    methods::NEW_PAYLOAD_V3,
    methods::FORKCHOICE_UPDATED_V3,
    methods::GET_PAYLOAD_V3,
];

/// Status string reported by the execution client.
///
/// Strings this client does not know deserialize into [`PayloadStatusKind::Unknown`] instead of
/// failing the whole response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadStatusKind {
    Valid,
    Invalid,
    InvalidBlockHash,
    Syncing,
    Accepted,
    #[serde(other)]
    Unknown,
}

/// `PayloadStatusV1` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadStatusV1 {
    pub status: PayloadStatusKind,
    #[serde(default)]
    pub latest_valid_hash: Option<B256>,
    #[serde(default)]
    pub validation_error: Option<String>,
}

impl PayloadStatusV1 {
    pub fn new(status: PayloadStatusKind, latest_valid_hash: Option<B256>) -> Self {
        Self {
            status,
            latest_valid_hash,
            validation_error: None,
        }
    }

    pub fn with_validation_error(mut self, err: impl Into<String>) -> Self {
        self.validation_error = Some(err.into());
        self
    }
}

/// Response of `engine_forkchoiceUpdated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkchoiceUpdatedResponse {
    pub payload_status: PayloadStatusV1,
    #[serde(default)]
    pub payload_id: Option<PayloadId>,
}
