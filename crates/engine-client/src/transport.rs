//! Request/response transport to the execution client.

use std::{fmt, sync::Arc, time::Duration};

use alloy_primitives::{B256, U64};
use async_trait::async_trait;
use http::{header::AUTHORIZATION, HeaderMap, HeaderValue};
use jsonrpsee::{
    core::{client::ClientT, ClientError},
    http_client::{transport::Error as HttpTransportError, HttpClient, HttpClientBuilder},
    rpc_params,
};
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::*;

use crate::{
    jwt::{bearer_token, JwtSecretProvider},
    types::{
        methods, ExecutionPayloadEnvelopeV3, ExecutionPayloadV3, ForkchoiceState,
        ForkchoiceUpdatedResponse, PayloadAttributes, PayloadId, PayloadStatusV1,
    },
};

/// Transport-level failure, before any domain classification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The locally imposed call deadline expired.
    #[error("engine call deadline exceeded")]
    Deadline,

    /// The HTTP client gave up waiting for the remote.
    #[error("http request timed out")]
    HttpTimeout,

    /// The remote rejected our credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A bearer token could not be produced locally.
    #[error("auth setup failed: {0}")]
    Auth(String),

    /// Structured JSON-RPC error object returned by the remote.
    #[error("rpc error {code}: {message}")]
    Rpc {
        code: i32,
        message: String,
        data: Option<String>,
    },

    /// The response could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Any other connection-level failure.
    #[error("connection error: {0}")]
    Connection(String),
}

impl TransportError {
    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }
}

const UNAUTHORIZED_STATUS: u16 = 401;

impl From<ClientError> for TransportError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Call(obj) => TransportError::Rpc {
                code: obj.code(),
                message: obj.message().to_string(),
                data: obj.data().map(|d| d.get().to_string()),
            },
            ClientError::RequestTimeout => TransportError::HttpTimeout,
            ClientError::Transport(e) => match e.downcast_ref::<HttpTransportError>() {
                Some(HttpTransportError::Rejected {
                    status_code: UNAUTHORIZED_STATUS,
                }) => TransportError::Unauthorized(e.to_string()),
                _ => TransportError::Connection(e.to_string()),
            },
            ClientError::ParseError(e) => TransportError::Decode(e.to_string()),
            other => TransportError::Connection(other.to_string()),
        }
    }
}

/// Engine API calls used by the client.
///
/// A `None` result means the remote answered with `null`.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait EngineTransport: Send + Sync + 'static {
    /// Re-establishes the session with a freshly signed token.
    fn refresh_auth(&self) -> Result<(), TransportError>;

    async fn chain_id(&self) -> Result<u64, TransportError>;

    async fn exchange_capabilities(
        &self,
        capabilities: Vec<String>,
    ) -> Result<Vec<String>, TransportError>;

    async fn new_payload_v3(
        &self,
        payload: ExecutionPayloadV3,
        versioned_hashes: Vec<B256>,
        parent_beacon_block_root: B256,
    ) -> Result<Option<PayloadStatusV1>, TransportError>;

    async fn fork_choice_updated_v3(
        &self,
        state: ForkchoiceState,
        attrs: Option<PayloadAttributes>,
    ) -> Result<Option<ForkchoiceUpdatedResponse>, TransportError>;

    async fn get_payload_v3(
        &self,
        payload_id: PayloadId,
    ) -> Result<Option<ExecutionPayloadEnvelopeV3>, TransportError>;
}

/// JSON-RPC over HTTP(S) with a bearer token header.
pub struct HttpEngineTransport {
    url: String,
    http_timeout: Duration,
    jwt: Option<Arc<dyn JwtSecretProvider>>,
    client: RwLock<Arc<HttpClient>>,
}

impl fmt::Debug for HttpEngineTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEngineTransport")
            .field("url", &self.url)
            .field("http_timeout", &self.http_timeout)
            .field("jwt", &self.jwt.is_some())
            .finish()
    }
}

fn check_scheme(url: &str) -> Result<(), TransportError> {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Ok(())
    } else {
        Err(TransportError::Connection(format!(
            "unsupported dial url scheme: {url}"
        )))
    }
}

fn build_client(
    url: &str,
    http_timeout: Duration,
    jwt: Option<&dyn JwtSecretProvider>,
) -> Result<HttpClient, TransportError> {
    let mut headers = HeaderMap::new();
    if let Some(jwt) = jwt {
        let token = bearer_token(jwt)?;
        let value = HeaderValue::from_str(&token).map_err(|e| TransportError::Auth(e.to_string()))?;
        headers.insert(AUTHORIZATION, value);
    }

    HttpClientBuilder::default()
        .request_timeout(http_timeout)
        .set_headers(headers)
        .build(url)
        .map_err(TransportError::from)
}

impl HttpEngineTransport {
    /// Creates the transport and signs an initial token.
    pub fn new(
        url: impl Into<String>,
        http_timeout: Duration,
        jwt: Option<Arc<dyn JwtSecretProvider>>,
    ) -> Result<Self, TransportError> {
        let url = url.into();
        check_scheme(&url)?;
        let client = build_client(&url, http_timeout, jwt.as_deref())?;
        Ok(Self {
            url,
            http_timeout,
            jwt,
            client: RwLock::new(Arc::new(client)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn client(&self) -> Arc<HttpClient> {
        self.client.read().clone()
    }
}

#[async_trait]
impl EngineTransport for HttpEngineTransport {
    fn refresh_auth(&self) -> Result<(), TransportError> {
        let client = build_client(&self.url, self.http_timeout, self.jwt.as_deref())?;
        *self.client.write() = Arc::new(client);
        trace!(url = %self.url, "refreshed engine client auth");
        Ok(())
    }

    async fn chain_id(&self) -> Result<u64, TransportError> {
        let id: U64 = self
            .client()
            .request(methods::CHAIN_ID, rpc_params![])
            .await?;
        Ok(id.to::<u64>())
    }

    async fn exchange_capabilities(
        &self,
        capabilities: Vec<String>,
    ) -> Result<Vec<String>, TransportError> {
        let remote = self
            .client()
            .request(methods::EXCHANGE_CAPABILITIES, rpc_params![capabilities])
            .await?;
        Ok(remote)
    }

    async fn new_payload_v3(
        &self,
        payload: ExecutionPayloadV3,
        versioned_hashes: Vec<B256>,
        parent_beacon_block_root: B256,
    ) -> Result<Option<PayloadStatusV1>, TransportError> {
        let status = self
            .client()
            .request(
                methods::NEW_PAYLOAD_V3,
                rpc_params![payload, versioned_hashes, parent_beacon_block_root],
            )
            .await?;
        Ok(status)
    }

    async fn fork_choice_updated_v3(
        &self,
        state: ForkchoiceState,
        attrs: Option<PayloadAttributes>,
    ) -> Result<Option<ForkchoiceUpdatedResponse>, TransportError> {
        let resp = self
            .client()
            .request(methods::FORKCHOICE_UPDATED_V3, rpc_params![state, attrs])
            .await?;
        Ok(resp)
    }

    async fn get_payload_v3(
        &self,
        payload_id: PayloadId,
    ) -> Result<Option<ExecutionPayloadEnvelopeV3>, TransportError> {
        let envelope = self
            .client()
            .request(methods::GET_PAYLOAD_V3, rpc_params![payload_id])
            .await?;
        Ok(envelope)
    }
}
