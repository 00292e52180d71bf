//! Observability events of the execution engine. Every outcome branch logs once and bumps one
//! counter.

use std::sync::Arc;

use alloy_primitives::B256;
use beacon_common::metrics::TelemetrySink;
use beacon_engine_client::{types::ForkchoiceState, EngineClientError, ProtocolError};
use tracing::*;

use crate::errors::PayloadVerificationError;

pub mod keys {
    pub const NEW_PAYLOAD: &str = "beacon_kit.execution.engine.new_payload";
    pub const NEW_PAYLOAD_VALID: &str = "beacon_kit.execution.engine.new_payload_valid";
    pub const NEW_PAYLOAD_ACCEPTED_SYNCING: &str =
        "beacon_kit.execution.engine.new_payload_accepted_syncing_payload_status";
    pub const NEW_PAYLOAD_INVALID_REQUEST: &str =
        "beacon_kit.execution.engine.new_payload_invalid_request";
    pub const NEW_PAYLOAD_INVALID: &str =
        "beacon_kit.execution.engine.new_payload_invalid_payload_status";
    pub const NEW_PAYLOAD_JSON_RPC_ERROR: &str =
        "beacon_kit.execution.engine.new_payload_json_rpc_error";
    pub const NEW_PAYLOAD_UNDEFINED_ERROR: &str =
        "beacon_kit.execution.engine.new_payload_undefined_error";

    pub const FORKCHOICE_UPDATE: &str = "beacon_kit.execution.engine.forkchoice_update";
    pub const FORKCHOICE_UPDATE_VALID: &str =
        "beacon_kit.execution.engine.forkchoice_update_valid";
    pub const FORKCHOICE_UPDATE_SYNCING: &str =
        "beacon_kit.execution.engine.forkchoice_update_syncing";
    pub const FORKCHOICE_UPDATE_INVALID: &str =
        "beacon_kit.execution.engine.forkchoice_update_invalid";
    pub const FORKCHOICE_UPDATE_NIL_PAYLOAD_ID: &str =
        "beacon_kit.execution.engine.forkchoice_update_nil_payload_id";
    pub const FORKCHOICE_UPDATE_JSON_RPC_ERROR: &str =
        "beacon_kit.execution.engine.forkchoice_update_json_rpc_error";
    pub const FORKCHOICE_UPDATE_UNDEFINED_ERROR: &str =
        "beacon_kit.execution.engine.forkchoice_update_undefined_error";
}

fn bool_label(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}

/// Failures on an optimistic path are expected and only warrant a warning.
macro_rules! log_failure {
    ($optimistic:expr, $($arg:tt)+) => {
        if $optimistic {
            warn!($($arg)+);
        } else {
            error!($($arg)+);
        }
    };
}

#[derive(Debug, Clone)]
pub(crate) struct EngineMetrics {
    sink: Arc<dyn TelemetrySink>,
}

impl EngineMetrics {
    pub(crate) fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self { sink }
    }

    /// Counted on entry, before any branch event.
    pub(crate) fn mark_new_payload_called(&self, optimistic: bool) {
        self.sink.increment_counter(
            keys::NEW_PAYLOAD,
            &[("is_optimistic", bool_label(optimistic))],
        );
    }

    pub(crate) fn mark_new_payload_valid(
        &self,
        block_hash: B256,
        parent_hash: B256,
        optimistic: bool,
    ) {
        info!(%block_hash, %parent_hash, optimistic, "inserted new payload into execution chain");
        self.sink.increment_counter(
            keys::NEW_PAYLOAD_VALID,
            &[("is_optimistic", bool_label(optimistic))],
        );
    }

    pub(crate) fn mark_new_payload_accepted_syncing(
        &self,
        block_hash: B256,
        parent_hash: B256,
        optimistic: bool,
        err: &EngineClientError,
    ) {
        log_failure!(
            optimistic,
            %block_hash,
            %parent_hash,
            %err,
            "received accepted or syncing status for new payload"
        );
        self.sink.increment_counter(
            keys::NEW_PAYLOAD_ACCEPTED_SYNCING,
            &[("is_optimistic", bool_label(optimistic))],
        );
    }

    pub(crate) fn mark_new_payload_invalid_request(
        &self,
        block_hash: B256,
        optimistic: bool,
        err: &PayloadVerificationError,
    ) {
        error!(%block_hash, optimistic, %err, "rejected new payload before sending");
        self.sink.increment_counter(
            keys::NEW_PAYLOAD_INVALID_REQUEST,
            &[("is_optimistic", bool_label(optimistic))],
        );
    }

    pub(crate) fn mark_new_payload_invalid(
        &self,
        block_hash: B256,
        latest_valid_hash: Option<B256>,
        optimistic: bool,
    ) {
        error!(
            %block_hash,
            ?latest_valid_hash,
            optimistic,
            "received invalid payload status for new payload"
        );
        self.sink.increment_counter(
            keys::NEW_PAYLOAD_INVALID,
            &[("is_optimistic", bool_label(optimistic))],
        );
    }

    pub(crate) fn mark_new_payload_json_rpc_error(
        &self,
        block_hash: B256,
        optimistic: bool,
        err: &ProtocolError,
    ) {
        let code = err.code().to_string();
        log_failure!(
            optimistic,
            %block_hash,
            code = err.code(),
            %err,
            "received json-rpc error for new payload"
        );
        self.sink.increment_counter(
            keys::NEW_PAYLOAD_JSON_RPC_ERROR,
            &[
                ("is_optimistic", bool_label(optimistic)),
                ("code", code.as_str()),
            ],
        );
    }

    pub(crate) fn mark_new_payload_undefined_error(
        &self,
        block_hash: B256,
        optimistic: bool,
        err: &EngineClientError,
    ) {
        log_failure!(
            optimistic,
            %block_hash,
            %err,
            "received undefined error for new payload"
        );
        self.sink.increment_counter(
            keys::NEW_PAYLOAD_UNDEFINED_ERROR,
            &[("is_optimistic", bool_label(optimistic))],
        );
    }

    pub(crate) fn mark_forkchoice_update_called(&self, has_attributes: bool) {
        self.sink.increment_counter(
            keys::FORKCHOICE_UPDATE,
            &[("has_payload_attributes", bool_label(has_attributes))],
        );
    }

    pub(crate) fn mark_forkchoice_update_valid(
        &self,
        state: &ForkchoiceState,
        has_attributes: bool,
        building: bool,
    ) {
        debug!(
            head = %state.head_block_hash,
            safe = %state.safe_block_hash,
            finalized = %state.finalized_block_hash,
            has_attributes,
            building,
            "forkchoice updated"
        );
        self.sink.increment_counter(
            keys::FORKCHOICE_UPDATE_VALID,
            &[("has_payload_attributes", bool_label(has_attributes))],
        );
    }

    pub(crate) fn mark_forkchoice_update_syncing(
        &self,
        state: &ForkchoiceState,
        err: &EngineClientError,
    ) {
        warn!(
            head = %state.head_block_hash,
            %err,
            "received accepted or syncing status for forkchoice update"
        );
        self.sink
            .increment_counter(keys::FORKCHOICE_UPDATE_SYNCING, &[]);
    }

    pub(crate) fn mark_forkchoice_update_invalid(
        &self,
        state: &ForkchoiceState,
        latest_valid_hash: Option<B256>,
    ) {
        error!(
            head = %state.head_block_hash,
            ?latest_valid_hash,
            "received invalid payload status for forkchoice update"
        );
        self.sink
            .increment_counter(keys::FORKCHOICE_UPDATE_INVALID, &[]);
    }

    pub(crate) fn mark_forkchoice_update_nil_payload_id(&self, state: &ForkchoiceState) {
        error!(
            head = %state.head_block_hash,
            "execution client returned no payload id for forkchoice update with attributes"
        );
        self.sink
            .increment_counter(keys::FORKCHOICE_UPDATE_NIL_PAYLOAD_ID, &[]);
    }

    pub(crate) fn mark_forkchoice_update_json_rpc_error(
        &self,
        state: &ForkchoiceState,
        err: &ProtocolError,
    ) {
        let code = err.code().to_string();
        error!(
            head = %state.head_block_hash,
            code = err.code(),
            %err,
            "received json-rpc error for forkchoice update"
        );
        self.sink.increment_counter(
            keys::FORKCHOICE_UPDATE_JSON_RPC_ERROR,
            &[("code", code.as_str())],
        );
    }

    pub(crate) fn mark_forkchoice_update_undefined_error(
        &self,
        state: &ForkchoiceState,
        err: &EngineClientError,
    ) {
        error!(
            head = %state.head_block_hash,
            %err,
            "received undefined error for forkchoice update"
        );
        self.sink
            .increment_counter(keys::FORKCHOICE_UPDATE_UNDEFINED_ERROR, &[]);
    }
}
