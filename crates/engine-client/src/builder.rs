use std::sync::Arc;

use beacon_common::metrics::{NoopSink, TelemetrySink};
use beacon_config::EngineConfig;
use thiserror::Error;

use crate::{
    client::EngineClient,
    jwt::{FileJwtSecret, JwtSecretProvider},
    transport::{EngineTransport, HttpEngineTransport, TransportError},
};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("missing dependency: {0}")]
    MissingDependency(&'static str),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

/// Builder for an [`EngineClient`].
///
/// The telemetry sink defaults to [`NoopSink`]. With [`Self::build_http`] the transport is
/// created from the config, and the JWT secret falls back to `jwt_secret_path`.
#[derive(Debug)]
pub struct EngineClientBuilder<T> {
    config: Option<EngineConfig>,
    transport: Option<Arc<T>>,
    jwt: Option<Arc<dyn JwtSecretProvider>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl<T> EngineClientBuilder<T> {
    /// Create a new builder instance.
    pub fn new() -> Self {
        Self {
            config: None,
            transport: None,
            jwt: None,
            telemetry: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set a prebuilt transport.
    pub fn with_transport(mut self, transport: Arc<T>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_jwt_secret(mut self, jwt: Arc<dyn JwtSecretProvider>) -> Self {
        self.jwt = Some(jwt);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    fn resolve_jwt(&self, config: &EngineConfig) -> Option<Arc<dyn JwtSecretProvider>> {
        self.jwt.clone().or_else(|| {
            config
                .jwt_secret_path
                .as_ref()
                .map(|path| Arc::new(FileJwtSecret::new(path.clone())) as Arc<dyn JwtSecretProvider>)
        })
    }

    fn telemetry(&self) -> Arc<dyn TelemetrySink> {
        self.telemetry.clone().unwrap_or_else(|| Arc::new(NoopSink))
    }
}

impl<T: EngineTransport> EngineClientBuilder<T> {
    /// Build the client around the transport given through [`Self::with_transport`].
    pub fn build(self) -> Result<EngineClient<T>, BuildError> {
        let config = self
            .config
            .clone()
            .ok_or(BuildError::MissingDependency("config"))?;
        let transport = self
            .transport
            .clone()
            .ok_or(BuildError::MissingDependency("transport"))?;
        let jwt_configured = self.resolve_jwt(&config).is_some();
        Ok(EngineClient::new(
            config,
            transport,
            jwt_configured,
            self.telemetry(),
        ))
    }
}

impl EngineClientBuilder<HttpEngineTransport> {
    /// Build the client with an HTTP transport dialing `rpc_dial_url`.
    pub fn build_http(self) -> Result<EngineClient<HttpEngineTransport>, BuildError> {
        let config = self
            .config
            .clone()
            .ok_or(BuildError::MissingDependency("config"))?;
        let jwt = self.resolve_jwt(&config);
        let jwt_configured = jwt.is_some();
        let transport =
            HttpEngineTransport::new(config.rpc_dial_url.clone(), config.rpc_http_timeout(), jwt)?;
        Ok(EngineClient::new(
            config,
            Arc::new(transport),
            jwt_configured,
            self.telemetry(),
        ))
    }
}

impl<T> Default for EngineClientBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
