use std::{fmt, sync::Arc};

use alloy_primitives::B256;
use beacon_common::metrics::TelemetrySink;
use beacon_engine_client::{
    types::{ExecutionPayloadEnvelopeV3, PayloadId},
    ContractViolation, EngineClient, EngineClientError, EngineTransport, PayloadStatusError,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    errors::{ExecutionEngineError, ExecutionEngineResult},
    metrics::EngineMetrics,
    requests::{ForkchoiceUpdateRequest, GetPayloadRequest, NewPayloadRequest},
};

/// Translates engine client outcomes into the consensus-facing contract.
pub struct ExecutionEngine<T> {
    client: Arc<EngineClient<T>>,
    metrics: EngineMetrics,
}

impl<T> fmt::Debug for ExecutionEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl<T: EngineTransport> ExecutionEngine<T> {
    pub fn new(client: Arc<EngineClient<T>>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            client,
            metrics: EngineMetrics::new(telemetry),
        }
    }

    pub fn client(&self) -> &Arc<EngineClient<T>> {
        &self.client
    }

    /// Starts the connection manager on a background task.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<ExecutionEngineResult<()>> {
        let client = self.client.clone();
        tokio::spawn(async move {
            match client.start(&cancel).await {
                Ok(()) => Ok(()),
                Err(EngineClientError::Cancelled) => {
                    info!("execution client startup cancelled");
                    Err(EngineClientError::Cancelled.into())
                }
                Err(err) => {
                    error!(%err, "execution client startup failed");
                    Err(err.into())
                }
            }
        })
    }

    pub fn stop(&self) -> ExecutionEngineResult<()> {
        Ok(self.client.stop()?)
    }

    pub async fn get_payload(
        &self,
        req: &GetPayloadRequest,
    ) -> ExecutionEngineResult<ExecutionPayloadEnvelopeV3> {
        Ok(self.client.get_payload(req.payload_id, req.slot).await?)
    }

    /// Sends a forkchoice update.
    ///
    /// SYNCING/ACCEPTED statuses come back as the client error, unmodified. An INVALID status
    /// is reported as [`ExecutionEngineError::BadBlockProduced`].
    pub async fn notify_forkchoice_update(
        &self,
        req: ForkchoiceUpdateRequest,
    ) -> ExecutionEngineResult<(Option<PayloadId>, Option<B256>)> {
        let state = req.state;
        let has_attributes = req.payload_attributes.is_some();
        self.metrics.mark_forkchoice_update_called(has_attributes);

        let res = self
            .client
            .forkchoice_updated(state, req.payload_attributes)
            .await;

        match res {
            Ok((payload_id, latest_valid_hash)) => {
                if has_attributes && payload_id.is_none() {
                    self.metrics.mark_forkchoice_update_nil_payload_id(&state);
                    return Err(EngineClientError::from(
                        ContractViolation::NilPayloadIdOnValidResponse,
                    )
                    .into());
                }
                self.metrics.mark_forkchoice_update_valid(
                    &state,
                    has_attributes,
                    payload_id.is_some(),
                );
                Ok((payload_id, latest_valid_hash))
            }
            Err(
                err @ EngineClientError::PayloadStatus(
                    PayloadStatusError::Syncing | PayloadStatusError::Accepted,
                ),
            ) => {
                self.metrics.mark_forkchoice_update_syncing(&state, &err);
                Err(err.into())
            }
            Err(EngineClientError::PayloadStatus(PayloadStatusError::Invalid {
                latest_valid_hash,
                ..
            })) => {
                self.metrics
                    .mark_forkchoice_update_invalid(&state, latest_valid_hash);
                Err(ExecutionEngineError::BadBlockProduced { latest_valid_hash })
            }
            Err(EngineClientError::Protocol(err)) if err.is_predefined() => {
                self.metrics
                    .mark_forkchoice_update_json_rpc_error(&state, &err);
                Err(ExecutionEngineError::PreDefinedJsonRpc(err))
            }
            Err(err) => {
                self.metrics
                    .mark_forkchoice_update_undefined_error(&state, &err);
                Err(err.into())
            }
        }
    }

    /// Verifies and submits a new payload.
    ///
    /// A request failing [`NewPayloadRequest::has_valid_versioned_and_block_hashes`] is returned
    /// as [`ExecutionEngineError::InvalidRequest`] without reaching the execution client, even
    /// when optimistic. SYNCING/ACCEPTED count as success. INVALID is always reported as
    /// [`ExecutionEngineError::BadBlockProduced`]. For optimistic requests every other failure
    /// except a contract violation is logged and dropped.
    pub async fn notify_new_payload(&self, req: NewPayloadRequest) -> ExecutionEngineResult<()> {
        let block_hash = req.block_hash();
        let parent_hash = req.parent_hash();
        let optimistic = req.is_optimistic();
        self.metrics.mark_new_payload_called(optimistic);

        if let Err(err) = req.has_valid_versioned_and_block_hashes() {
            self.metrics
                .mark_new_payload_invalid_request(block_hash, optimistic, &err);
            return Err(err.into());
        }

        let res = self
            .client
            .new_payload(
                req.execution_payload,
                req.versioned_hashes,
                req.parent_beacon_block_root,
            )
            .await;

        let err: ExecutionEngineError = match res {
            Ok(_) => {
                self.metrics
                    .mark_new_payload_valid(block_hash, parent_hash, optimistic);
                return Ok(());
            }
            Err(
                err @ EngineClientError::PayloadStatus(
                    PayloadStatusError::Syncing | PayloadStatusError::Accepted,
                ),
            ) => {
                self.metrics.mark_new_payload_accepted_syncing(
                    block_hash,
                    parent_hash,
                    optimistic,
                    &err,
                );
                return Ok(());
            }
            Err(EngineClientError::PayloadStatus(PayloadStatusError::Invalid {
                latest_valid_hash,
                ..
            })) => {
                self.metrics
                    .mark_new_payload_invalid(block_hash, latest_valid_hash, optimistic);
                return Err(ExecutionEngineError::BadBlockProduced { latest_valid_hash });
            }
            Err(EngineClientError::Protocol(err)) if err.is_predefined() => {
                self.metrics
                    .mark_new_payload_json_rpc_error(block_hash, optimistic, &err);
                ExecutionEngineError::PreDefinedJsonRpc(err)
            }
            Err(err) => {
                self.metrics
                    .mark_new_payload_undefined_error(block_hash, optimistic, &err);
                err.into()
            }
        };

        let contract_violation = matches!(
            err,
            ExecutionEngineError::Client(EngineClientError::ContractViolation(_))
        );
        if optimistic && !contract_violation {
            return Ok(());
        }
        Err(err)
    }
}
