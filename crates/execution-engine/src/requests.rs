use alloy_consensus::{Transaction, TxEnvelope};
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::B256;
use beacon_engine_client::types::{
    ExecutionPayloadV3, ForkchoiceState, PayloadAttributes, PayloadId,
};

use crate::errors::PayloadVerificationError;

/// Redeems a payload id handed out by a forkchoice update with attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetPayloadRequest {
    pub payload_id: PayloadId,
    pub slot: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkchoiceUpdateRequest {
    pub state: ForkchoiceState,
    /// When set, the execution client is asked to start building a payload.
    pub payload_attributes: Option<PayloadAttributes>,
}

impl ForkchoiceUpdateRequest {
    pub fn new(state: ForkchoiceState) -> Self {
        Self {
            state,
            payload_attributes: None,
        }
    }

    pub fn with_attributes(mut self, attrs: PayloadAttributes) -> Self {
        self.payload_attributes = Some(attrs);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayloadRequest {
    pub execution_payload: ExecutionPayloadV3,
    pub versioned_hashes: Vec<B256>,
    pub parent_beacon_block_root: B256,
    /// Failures other than an invalid status are logged and swallowed.
    pub optimistic: bool,
}

impl NewPayloadRequest {
    pub fn new(
        execution_payload: ExecutionPayloadV3,
        versioned_hashes: Vec<B256>,
        parent_beacon_block_root: B256,
    ) -> Self {
        Self {
            execution_payload,
            versioned_hashes,
            parent_beacon_block_root,
            optimistic: false,
        }
    }

    pub fn optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }

    pub fn is_optimistic(&self) -> bool {
        self.optimistic
    }

    pub fn block_hash(&self) -> B256 {
        self.execution_payload.payload_inner.payload_inner.block_hash
    }

    pub fn parent_hash(&self) -> B256 {
        self.execution_payload.payload_inner.payload_inner.parent_hash
    }

    /// Checks the blob versioned hashes and the block hash against the payload contents.
    ///
    /// Every transaction must decode, the blob hashes they carry must equal
    /// `versioned_hashes` in count and order, and the header rebuilt from the payload and
    /// `parent_beacon_block_root` must hash to the payload's block hash.
    pub fn has_valid_versioned_and_block_hashes(&self) -> Result<(), PayloadVerificationError> {
        let payload = &self.execution_payload;

        let transactions = &payload.payload_inner.payload_inner.transactions;
        let mut blob_hashes = Vec::new();
        for (index, raw) in transactions.iter().enumerate() {
            let tx = TxEnvelope::decode_2718_exact(raw.as_ref()).map_err(|err| {
                PayloadVerificationError::InvalidTransaction {
                    index,
                    reason: err.to_string(),
                }
            })?;
            if let Some(hashes) = tx.blob_versioned_hashes() {
                blob_hashes.extend_from_slice(hashes);
            }
        }

        if blob_hashes.len() != self.versioned_hashes.len() {
            return Err(PayloadVerificationError::VersionedHashCount {
                expected: self.versioned_hashes.len(),
                actual: blob_hashes.len(),
            });
        }
        let pairs = blob_hashes.iter().zip(&self.versioned_hashes);
        for (index, (actual, expected)) in pairs.enumerate() {
            if actual != expected {
                return Err(PayloadVerificationError::VersionedHashMismatch {
                    index,
                    expected: *expected,
                    actual: *actual,
                });
            }
        }

        let computed = self.computed_block_hash()?;
        let claimed = self.block_hash();
        if computed != claimed {
            return Err(PayloadVerificationError::BlockHashMismatch { claimed, computed });
        }
        Ok(())
    }

    /// Hash of the header rebuilt from the payload.
    pub fn computed_block_hash(&self) -> Result<B256, PayloadVerificationError> {
        let mut block = self
            .execution_payload
            .clone()
            .into_block_raw()
            .map_err(|err| PayloadVerificationError::MalformedPayload(err.to_string()))?;
        block.header.parent_beacon_block_root = Some(self.parent_beacon_block_root);
        Ok(block.header.hash_slow())
    }
}
