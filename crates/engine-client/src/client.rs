//! Connection manager: owns the transport, verifies the session and runs the engine calls.

use std::{
    collections::HashSet,
    fmt,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use alloy_primitives::{Address, B256};
use beacon_common::{
    metrics::TelemetrySink,
    retry::{retry_with_timeout, RetryError},
};
use beacon_config::EngineConfig;
use parking_lot::{Mutex, RwLock};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    errors::{
        classify, ConnectionError, ContractViolation, EngineClientError, EngineClientResult,
        TimeoutKind,
    },
    status::process_payload_status,
    transport::{EngineTransport, TransportError},
    types::{
        ExecutionPayloadEnvelopeV3, ExecutionPayloadV3, ForkchoiceState, PayloadAttributes,
        PayloadId, SUPPORTED_CAPABILITIES,
    },
};

/// Histogram of engine call durations, labelled by method.
pub const CALL_DURATION_KEY: &str = "beacon_kit.execution.client.call_duration";

/// Counter of calls that hit the local deadline, labelled by method.
pub const ENGINE_API_TIMEOUT_KEY: &str = "beacon_kit.execution.client.engine_api_timeout";

const UNAUTHENTICATED_CONNECTION_MSG: &str = "could not authenticate with the execution client, \
     check that the jwt secret matches the one configured on the execution client";

/// Session state. `connected` and the capability snapshot are updated together.
#[derive(Debug, Default)]
struct ConnectionState {
    connected: bool,
    capabilities: Arc<HashSet<String>>,
}

/// Client for the execution engine.
///
/// Safe to share between tasks; every call takes `&self`.
pub struct EngineClient<T> {
    config: EngineConfig,
    transport: Arc<T>,
    jwt_configured: bool,
    state: RwLock<ConnectionState>,
    status_err: Arc<RwLock<Option<EngineClientError>>>,
    shutdown: CancellationToken,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl<T> fmt::Debug for EngineClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineClient")
            .field("dial_url", &self.config.rpc_dial_url)
            .field("required_chain_id", &self.config.required_chain_id)
            .field("connected", &self.state.read().connected)
            .finish_non_exhaustive()
    }
}

impl<T: EngineTransport> EngineClient<T> {
    pub fn new(
        config: EngineConfig,
        transport: Arc<T>,
        jwt_configured: bool,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            config,
            transport,
            jwt_configured,
            state: RwLock::new(ConnectionState::default()),
            status_err: Arc::new(RwLock::new(None)),
            shutdown: CancellationToken::new(),
            refresh_task: Mutex::new(None),
            telemetry,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Verifies the session, retrying at a fixed interval until it succeeds.
    ///
    /// Returns [`EngineClientError::Cancelled`] if `cancel` fires or [`Self::stop`] is called
    /// first. On success the auth refresh loop is started for http(s) endpoints.
    pub async fn start(&self, cancel: &CancellationToken) -> EngineClientResult<()> {
        let dial_url = self.config.rpc_dial_url.as_str();
        if self.config.is_http() && !self.jwt_configured {
            warn!(%dial_url, "no jwt secret configured for http engine endpoint");
        }

        info!(%dial_url, chain_id = self.config.required_chain_id, "connecting to execution client");

        let interval = self.config.rpc_startup_check_interval();
        loop {
            match self.verify().await {
                Ok(()) => break,
                Err(err) => self.log_verify_failure(&err),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineClientError::Cancelled),
                _ = self.shutdown.cancelled() => return Err(EngineClientError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }

        if self.config.is_http() && self.jwt_configured {
            self.spawn_auth_refresh(cancel);
        }

        Ok(())
    }

    /// Stops background work. The connected flag is left as is.
    pub fn stop(&self) -> EngineClientResult<()> {
        self.shutdown.cancel();
        if let Some(handle) = self.refresh_task.lock().take() {
            handle.abort();
        }
        info!("engine client stopped");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.state.read().capabilities.contains(name)
    }

    /// Capabilities from the last successful exchange.
    pub fn capabilities(&self) -> Arc<HashSet<String>> {
        self.state.read().capabilities.clone()
    }

    /// Last error recorded by a health check or auth refresh.
    pub fn last_status_error(&self) -> Option<EngineClientError> {
        self.status_err.read().clone()
    }

    /// Dials, checks the chain id and exchanges capabilities, in that order.
    async fn verify(&self) -> Result<(), ConnectionError> {
        self.transport
            .refresh_auth()
            .map_err(ConnectionError::Transport)?;

        let actual = self
            .with_deadline(self.transport.chain_id())
            .await
            .map_err(ConnectionError::Transport)?;
        let expected = self.config.required_chain_id;
        if actual != expected {
            return Err(ConnectionError::ChainIdMismatch { expected, actual });
        }

        let local = SUPPORTED_CAPABILITIES
            .iter()
            .map(|c| c.to_string())
            .collect();
        let remote: HashSet<String> = self
            .with_deadline(self.transport.exchange_capabilities(local))
            .await
            .map_err(ConnectionError::CapabilityExchange)?
            .into_iter()
            .collect();
        log_capabilities(&remote);

        {
            let mut state = self.state.write();
            state.capabilities = Arc::new(remote);
            state.connected = true;
        }
        *self.status_err.write() = None;

        info!(dial_url = %self.config.rpc_dial_url, chain_id = actual, "connected to execution client");
        Ok(())
    }

    fn log_verify_failure(&self, err: &ConnectionError) {
        let dial_url = self.config.rpc_dial_url.as_str();
        match err {
            ConnectionError::Transport(
                TransportError::Unauthorized(msg) | TransportError::Auth(msg),
            ) => {
                error!(%dial_url, %msg, "{UNAUTHENTICATED_CONNECTION_MSG}");
            }
            ConnectionError::ChainIdMismatch { expected, actual } => {
                warn!(%dial_url, expected, actual, "execution client reported wrong chain id, retrying");
            }
            err => {
                warn!(%dial_url, %err, "waiting for execution client to be ready, retrying");
            }
        }
    }

    fn spawn_auth_refresh(&self, cancel: &CancellationToken) {
        let period = self.config.rpc_jwt_refresh_interval();
        if period.is_zero() {
            warn!("jwt refresh interval is zero, auth refresh disabled");
            return;
        }

        let transport = self.transport.clone();
        let status_err = self.status_err.clone();
        let shutdown = self.shutdown.clone();
        let cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match transport.refresh_auth() {
                            Ok(()) => {
                                trace!("refreshed execution client auth");
                                *status_err.write() = None;
                            }
                            Err(err) => {
                                error!(%err, "failed to refresh execution client auth");
                                *status_err.write() = Some(classify(err));
                            }
                        }
                    }
                }
            }
            debug!("auth refresh loop exited");
        });

        if let Some(old) = self.refresh_task.lock().replace(handle) {
            old.abort();
        }
    }

    /// Re-checks the chain id and records the outcome. Never touches the connected flag.
    pub async fn status(&self) -> EngineClientResult<()> {
        let res = match self.with_deadline(self.transport.chain_id()).await {
            Ok(actual) if actual == self.config.required_chain_id => Ok(()),
            Ok(actual) => Err(ConnectionError::ChainIdMismatch {
                expected: self.config.required_chain_id,
                actual,
            }
            .into()),
            Err(err) => Err(classify(err)),
        };
        *self.status_err.write() = res.as_ref().err().cloned();
        res
    }

    /// Polls [`Self::status`] with backoff until healthy or `timeout`.
    ///
    /// Refused connections, timeouts and a wrong chain id are waited out, since a restarting
    /// execution client produces all of them. Only an auth failure or a contract violation ends
    /// the wait early.
    pub async fn wait_for_healthy(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> EngineClientResult<()> {
        let policy = self.config.retry.to_backoff();
        let res = retry_with_timeout(cancel, timeout, &policy, || async move {
            match self.status().await {
                Ok(()) => Ok(true),
                Err(
                    err @ (EngineClientError::Unauthorized(_)
                    | EngineClientError::ContractViolation(_)),
                ) => Err(err),
                Err(err) => {
                    debug!(%err, "execution client not healthy yet");
                    Ok(false)
                }
            }
        })
        .await;

        match res {
            Ok(()) => Ok(()),
            Err(RetryError::Terminal(err)) => Err(err),
            Err(RetryError::Cancelled) => Err(EngineClientError::Cancelled),
            Err(RetryError::Timeout { elapsed, attempts }) => {
                warn!(?elapsed, attempts, "execution client did not become healthy");
                Err(self
                    .last_status_error()
                    .unwrap_or(EngineClientError::Timeout(TimeoutKind::EngineApi)))
            }
        }
    }

    /// Fetches a payload previously requested through a forkchoice update.
    pub async fn get_payload(
        &self,
        payload_id: PayloadId,
        slot: u64,
    ) -> EngineClientResult<ExecutionPayloadEnvelopeV3> {
        let res = self
            .timed_call("get_payload", self.transport.get_payload_v3(payload_id))
            .await?;
        let envelope = res.ok_or(ContractViolation::NilExecutionPayloadEnvelope)?;

        debug!(
            %payload_id,
            slot,
            block_hash = %envelope.execution_payload.payload_inner.payload_inner.block_hash,
            blobs = envelope.blobs_bundle.blobs.len(),
            "retrieved payload from execution client"
        );
        Ok(envelope)
    }

    /// Sends a forkchoice update, returning the payload id (if building) and latest valid hash.
    pub async fn forkchoice_updated(
        &self,
        state: ForkchoiceState,
        attrs: Option<PayloadAttributes>,
    ) -> EngineClientResult<(Option<PayloadId>, Option<B256>)> {
        if let Some(attrs) = &attrs {
            if attrs.suggested_fee_recipient == Address::ZERO {
                warn!(
                    head = %state.head_block_hash,
                    "suggested fee recipient is the zero address, priority fees will be burned"
                );
            }
        }

        let res = self
            .timed_call(
                "forkchoice_updated",
                self.transport.fork_choice_updated_v3(state, attrs),
            )
            .await?;
        let resp = res.ok_or(ContractViolation::NilForkchoiceResponse)?;

        let latest_valid_hash = process_payload_status(&resp.payload_status)?;
        Ok((resp.payload_id, latest_valid_hash))
    }

    /// Submits a payload for validation, returning the latest valid hash.
    pub async fn new_payload(
        &self,
        payload: ExecutionPayloadV3,
        versioned_hashes: Vec<B256>,
        parent_beacon_block_root: B256,
    ) -> EngineClientResult<Option<B256>> {
        let block_hash = payload.payload_inner.payload_inner.block_hash;
        let res = self
            .timed_call(
                "new_payload",
                self.transport
                    .new_payload_v3(payload, versioned_hashes, parent_beacon_block_root),
            )
            .await?;
        let status = res.ok_or(ContractViolation::NilPayloadStatus)?;

        if let Some(validation_error) = &status.validation_error {
            error!(%block_hash, %validation_error, "execution client reported payload validation error");
        }

        Ok(process_payload_status(&status)?)
    }

    async fn with_deadline<R>(
        &self,
        fut: impl Future<Output = Result<R, TransportError>>,
    ) -> Result<R, TransportError> {
        match tokio::time::timeout(self.config.rpc_timeout(), fut).await {
            Ok(res) => res,
            Err(_) => Err(TransportError::Deadline),
        }
    }

    /// Runs an engine call under the deadline, recording its duration and any timeout.
    async fn timed_call<R>(
        &self,
        method: &'static str,
        fut: impl Future<Output = Result<R, TransportError>>,
    ) -> EngineClientResult<R> {
        let labels = [("method", method)];
        let start = Instant::now();
        let res = self.with_deadline(fut).await;
        self.telemetry
            .measure_since(CALL_DURATION_KEY, start, &labels);

        res.map_err(|err| {
            let err = classify(err);
            if err == EngineClientError::Timeout(TimeoutKind::EngineApi) {
                self.telemetry
                    .increment_counter(ENGINE_API_TIMEOUT_KEY, &labels);
            }
            err
        })
    }
}

fn log_capabilities(remote: &HashSet<String>) {
    for capability in remote {
        info!(%capability, "execution client capability");
    }
    for capability in SUPPORTED_CAPABILITIES {
        if !remote.contains(*capability) {
            warn!(
                %capability,
                "execution client does not support capability, it may require an update"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use alloy_primitives::{Bloom, Bytes, U256};
    use alloy_rpc_types_engine::{ExecutionPayloadV1, ExecutionPayloadV2};
    use async_trait::async_trait;
    use beacon_common::metrics::RecordingSink;

    use super::*;
    use crate::{
        errors::{PayloadStatusError, ProtocolError},
        transport::MockEngineTransport,
        types::{ForkchoiceUpdatedResponse, PayloadStatusKind, PayloadStatusV1},
    };

    const CHAIN_ID: u64 = 80087;

    fn test_config() -> EngineConfig {
        EngineConfig {
            required_chain_id: CHAIN_ID,
            rpc_timeout_ms: 100,
            rpc_startup_check_interval_ms: 1_000,
            rpc_jwt_refresh_interval_ms: 5_000,
            ..Default::default()
        }
    }

    fn client_with(
        transport: MockEngineTransport,
    ) -> (EngineClient<MockEngineTransport>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let client = EngineClient::new(test_config(), Arc::new(transport), false, sink.clone());
        (client, sink)
    }

    fn all_capabilities() -> Vec<String> {
        SUPPORTED_CAPABILITIES.iter().map(|c| c.to_string()).collect()
    }

    fn test_payload() -> ExecutionPayloadV3 {
        ExecutionPayloadV3 {
            payload_inner: ExecutionPayloadV2 {
                payload_inner: ExecutionPayloadV1 {
                    parent_hash: B256::repeat_byte(1),
                    fee_recipient: Address::repeat_byte(2),
                    state_root: B256::ZERO,
                    receipts_root: B256::ZERO,
                    logs_bloom: Bloom::ZERO,
                    prev_randao: B256::ZERO,
                    block_number: 1,
                    gas_limit: 30_000_000,
                    gas_used: 0,
                    timestamp: 1,
                    extra_data: Bytes::new(),
                    base_fee_per_gas: U256::from(7),
                    block_hash: B256::repeat_byte(9),
                    transactions: Vec::new(),
                },
                withdrawals: Vec::new(),
            },
            blob_gas_used: 0,
            excess_blob_gas: 0,
        }
    }

    #[tokio::test]
    async fn test_verify_sets_connected_on_matching_chain() {
        let mut transport = MockEngineTransport::new();
        transport.expect_refresh_auth().returning(|| Ok(()));
        transport.expect_chain_id().times(1).returning(|| Ok(CHAIN_ID));
        transport
            .expect_exchange_capabilities()
            .times(1)
            .returning(|_| Ok(vec![crate::types::methods::NEW_PAYLOAD_V3.to_string()]));
        let (client, _) = client_with(transport);

        assert!(!client.is_connected());
        client.verify().await.unwrap();
        assert!(client.is_connected());
        assert!(client.has_capability("engine_newPayloadV3"));
        assert!(!client.has_capability("engine_getPayloadV3"));
        assert_eq!(client.capabilities().len(), 1);
    }

    #[tokio::test]
    async fn test_chain_mismatch_skips_capability_exchange() {
        let mut transport = MockEngineTransport::new();
        transport.expect_refresh_auth().returning(|| Ok(()));
        transport.expect_chain_id().returning(|| Ok(1337));
        transport.expect_exchange_capabilities().never();
        let (client, _) = client_with(transport);

        let err = client.verify().await.unwrap_err();
        assert_eq!(
            err,
            ConnectionError::ChainIdMismatch {
                expected: CHAIN_ID,
                actual: 1337
            }
        );
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_capability_failure_leaves_disconnected() {
        let mut transport = MockEngineTransport::new();
        transport.expect_refresh_auth().returning(|| Ok(()));
        transport.expect_chain_id().returning(|| Ok(CHAIN_ID));
        transport
            .expect_exchange_capabilities()
            .returning(|_| Err(TransportError::rpc(-32601, "method not found")));
        let (client, _) = client_with(transport);

        let err = client.verify().await.unwrap_err();
        assert!(matches!(err, ConnectionError::CapabilityExchange(_)));
        assert!(!client.is_connected());
        assert!(client.capabilities().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_reported_unchanged() {
        let mut transport = MockEngineTransport::new();
        transport.expect_refresh_auth().returning(|| Ok(()));
        transport
            .expect_chain_id()
            .returning(|| Err(TransportError::Connection("connection refused".into())));
        let (client, _) = client_with(transport);

        assert_eq!(
            client.verify().await.unwrap_err(),
            ConnectionError::Transport(TransportError::Connection("connection refused".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_retries_at_fixed_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut transport = MockEngineTransport::new();
        transport.expect_refresh_auth().returning(|| Ok(()));
        transport.expect_chain_id().returning(move || {
            if c.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TransportError::Connection("connection refused".into()))
            } else {
                Ok(CHAIN_ID)
            }
        });
        transport
            .expect_exchange_capabilities()
            .returning(|_| Ok(all_capabilities()));
        let (client, _) = client_with(transport);

        let before = tokio::time::Instant::now();
        client.start(&CancellationToken::new()).await.unwrap();

        assert!(client.is_connected());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two failed attempts, each followed by one fixed interval.
        assert_eq!(before.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_cancelled_while_chain_mismatched() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut transport = MockEngineTransport::new();
        transport.expect_refresh_auth().returning(|| Ok(()));
        transport.expect_chain_id().returning(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(1337)
        });
        transport.expect_exchange_capabilities().never();
        let (client, _) = client_with(transport);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3_500)).await;
            canceller.cancel();
        });

        let res = client.start(&cancel).await;
        assert_eq!(res, Err(EngineClientError::Cancelled));
        assert!(!client.is_connected());
        // Attempts at t=0, 1, 2, 3.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_keeps_retrying_when_unauthorized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut transport = MockEngineTransport::new();
        transport.expect_refresh_auth().returning(|| Ok(()));
        transport.expect_chain_id().returning(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Unauthorized("Request rejected `401`".into()))
        });
        let (client, _) = client_with(transport);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            canceller.cancel();
        });

        assert_eq!(client.start(&cancel).await, Err(EngineClientError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_startup_loop() {
        let mut transport = MockEngineTransport::new();
        transport.expect_refresh_auth().returning(|| Ok(()));
        transport.expect_chain_id().returning(|| Ok(1));
        let (client, _) = client_with(transport);
        let client = Arc::new(client);

        let c = client.clone();
        let task = tokio::spawn(async move { c.start(&CancellationToken::new()).await });
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        client.stop().unwrap();

        assert_eq!(task.await.unwrap(), Err(EngineClientError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_refresh_loop_runs_until_stopped() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let r = refreshes.clone();
        let mut transport = MockEngineTransport::new();
        transport.expect_refresh_auth().returning(move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        transport.expect_chain_id().returning(|| Ok(CHAIN_ID));
        transport
            .expect_exchange_capabilities()
            .returning(|_| Ok(all_capabilities()));
        let client = EngineClient::new(
            test_config(),
            Arc::new(transport),
            true,
            Arc::new(RecordingSink::new()),
        );

        client.start(&CancellationToken::new()).await.unwrap();
        // One refresh from the verification dial.
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 3);

        client.stop().unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_refresh_success_clears_status_error() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let r = refreshes.clone();
        let mut transport = MockEngineTransport::new();
        transport.expect_refresh_auth().returning(move || {
            // Verification dial, then one failed tick, then healthy again.
            if r.fetch_add(1, Ordering::SeqCst) == 1 {
                Err(TransportError::Auth("secret file unreadable".into()))
            } else {
                Ok(())
            }
        });
        transport.expect_chain_id().returning(|| Ok(CHAIN_ID));
        transport
            .expect_exchange_capabilities()
            .returning(|_| Ok(all_capabilities()));
        let client = EngineClient::new(
            test_config(),
            Arc::new(transport),
            true,
            Arc::new(RecordingSink::new()),
        );

        client.start(&CancellationToken::new()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(
            client.last_status_error(),
            Some(EngineClientError::Unauthorized(
                "secret file unreadable".into()
            ))
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.last_status_error(), None);
        client.stop().unwrap();
    }

    #[tokio::test]
    async fn test_forkchoice_updated_nil_response() {
        let mut transport = MockEngineTransport::new();
        transport
            .expect_fork_choice_updated_v3()
            .returning(|_, _| Ok(None));
        let (client, _) = client_with(transport);

        let err = client
            .forkchoice_updated(ForkchoiceState::default(), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineClientError::ContractViolation(ContractViolation::NilForkchoiceResponse)
        );
    }

    #[tokio::test]
    async fn test_forkchoice_updated_valid() {
        let id = PayloadId::new([1, 2, 3, 4, 5, 6, 7, 8]);
        let hash = B256::repeat_byte(5);
        let mut transport = MockEngineTransport::new();
        transport
            .expect_fork_choice_updated_v3()
            .returning(move |_, _| {
                Ok(Some(ForkchoiceUpdatedResponse {
                    payload_status: PayloadStatusV1::new(PayloadStatusKind::Valid, Some(hash)),
                    payload_id: Some(id),
                }))
            });
        let (client, sink) = client_with(transport);

        let res = client
            .forkchoice_updated(ForkchoiceState::default(), None)
            .await
            .unwrap();
        assert_eq!(res, (Some(id), Some(hash)));
        assert_eq!(sink.timings(CALL_DURATION_KEY), 1);
        assert_eq!(sink.count(ENGINE_API_TIMEOUT_KEY), 0);
    }

    #[tokio::test]
    async fn test_forkchoice_updated_syncing_status() {
        let mut transport = MockEngineTransport::new();
        transport.expect_fork_choice_updated_v3().returning(|_, _| {
            Ok(Some(ForkchoiceUpdatedResponse {
                payload_status: PayloadStatusV1::new(PayloadStatusKind::Syncing, None),
                payload_id: None,
            }))
        });
        let (client, _) = client_with(transport);

        let err = client
            .forkchoice_updated(ForkchoiceState::default(), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineClientError::PayloadStatus(PayloadStatusError::Syncing)
        );
    }

    #[tokio::test]
    async fn test_new_payload_protocol_error() {
        let mut transport = MockEngineTransport::new();
        transport
            .expect_new_payload_v3()
            .returning(|_, _, _| Err(TransportError::rpc(-38001, "Unknown payload")));
        let (client, _) = client_with(transport);

        let err = client
            .new_payload(test_payload(), vec![], B256::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, EngineClientError::Protocol(ProtocolError::UnknownPayload));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_new_payload_nil_status() {
        let mut transport = MockEngineTransport::new();
        transport
            .expect_new_payload_v3()
            .returning(|_, _, _| Ok(None));
        let (client, _) = client_with(transport);

        let err = client
            .new_payload(test_payload(), vec![], B256::ZERO)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineClientError::ContractViolation(ContractViolation::NilPayloadStatus)
        );
    }

    #[tokio::test]
    async fn test_get_payload_nil_envelope() {
        let mut transport = MockEngineTransport::new();
        transport.expect_get_payload_v3().returning(|_| Ok(None));
        let (client, _) = client_with(transport);

        let err = client
            .get_payload(PayloadId::new([0; 8]), 10)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineClientError::ContractViolation(ContractViolation::NilExecutionPayloadEnvelope)
        );
    }

    /// Transport whose calls never answer within the client deadline.
    #[derive(Debug)]
    struct StalledTransport;

    #[async_trait]
    impl EngineTransport for StalledTransport {
        fn refresh_auth(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn chain_id(&self) -> Result<u64, TransportError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(CHAIN_ID)
        }

        async fn exchange_capabilities(
            &self,
            capabilities: Vec<String>,
        ) -> Result<Vec<String>, TransportError> {
            Ok(capabilities)
        }

        async fn new_payload_v3(
            &self,
            _payload: ExecutionPayloadV3,
            _versioned_hashes: Vec<B256>,
            _parent_beacon_block_root: B256,
        ) -> Result<Option<PayloadStatusV1>, TransportError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn fork_choice_updated_v3(
            &self,
            _state: ForkchoiceState,
            _attrs: Option<PayloadAttributes>,
        ) -> Result<Option<ForkchoiceUpdatedResponse>, TransportError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn get_payload_v3(
            &self,
            _payload_id: PayloadId,
        ) -> Result<Option<ExecutionPayloadEnvelopeV3>, TransportError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_maps_to_engine_api_timeout() {
        let sink = Arc::new(RecordingSink::new());
        let client = EngineClient::new(
            test_config(),
            Arc::new(StalledTransport),
            false,
            sink.clone(),
        );

        let err = client
            .new_payload(test_payload(), vec![], B256::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, EngineClientError::Timeout(TimeoutKind::EngineApi));
        assert!(err.is_non_fatal());
        assert_eq!(sink.count(ENGINE_API_TIMEOUT_KEY), 1);
        assert_eq!(
            sink.last_labels(ENGINE_API_TIMEOUT_KEY),
            Some(vec![("method".to_string(), "new_payload".to_string())])
        );
        assert_eq!(sink.timings(CALL_DURATION_KEY), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_does_not_reset_connected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut transport = MockEngineTransport::new();
        transport.expect_refresh_auth().returning(|| Ok(()));
        transport.expect_chain_id().returning(move || {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(CHAIN_ID)
            } else {
                Err(TransportError::HttpTimeout)
            }
        });
        transport
            .expect_exchange_capabilities()
            .returning(|_| Ok(all_capabilities()));
        let (client, _) = client_with(transport);

        client.verify().await.unwrap();
        let err = client.status().await.unwrap_err();
        assert_eq!(err, EngineClientError::Timeout(TimeoutKind::Http));
        assert_eq!(client.last_status_error(), Some(err));
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_healthy_recovers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut transport = MockEngineTransport::new();
        transport.expect_chain_id().returning(move || {
            if c.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(TransportError::HttpTimeout)
            } else {
                Ok(CHAIN_ID)
            }
        });
        let (client, _) = client_with(transport);

        client
            .wait_for_healthy(&CancellationToken::new(), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(client.last_status_error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_healthy_outlasts_refused_connections() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut transport = MockEngineTransport::new();
        transport.expect_chain_id().returning(move || {
            if c.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TransportError::Connection("connection refused".into()))
            } else {
                Ok(CHAIN_ID)
            }
        });
        let (client, _) = client_with(transport);

        let res = client
            .wait_for_healthy(&CancellationToken::new(), Duration::from_secs(30))
            .await;
        assert_eq!(res, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.last_status_error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_healthy_outlasts_wrong_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut transport = MockEngineTransport::new();
        transport.expect_chain_id().returning(move || {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(1)
            } else {
                Ok(CHAIN_ID)
            }
        });
        let (client, _) = client_with(transport);

        client
            .wait_for_healthy(&CancellationToken::new(), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_healthy_stops_when_unauthorized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut transport = MockEngineTransport::new();
        transport.expect_chain_id().returning(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Unauthorized("401".into()))
        });
        let (client, _) = client_with(transport);

        let err = client
            .wait_for_healthy(&CancellationToken::new(), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert_eq!(err, EngineClientError::Unauthorized("401".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_healthy_times_out_with_last_error() {
        let mut transport = MockEngineTransport::new();
        transport
            .expect_chain_id()
            .returning(|| Err(TransportError::HttpTimeout));
        let (client, _) = client_with(transport);

        let err = client
            .wait_for_healthy(&CancellationToken::new(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err, EngineClientError::Timeout(TimeoutKind::Http));
    }
}
