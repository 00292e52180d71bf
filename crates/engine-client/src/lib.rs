//! Engine API client: transport, error classification and the connection manager that keeps
//! a verified session with the execution client.

pub mod builder;
pub mod client;
pub mod errors;
pub mod jwt;
pub mod status;
pub mod transport;
pub mod types;

pub use builder::{BuildError, EngineClientBuilder};
pub use client::EngineClient;
pub use errors::{
    classify, ConnectionError, ContractViolation, EngineClientError, EngineClientResult, Fatality,
    PayloadStatusError, ProtocolError, TimeoutKind,
};
pub use jwt::{FileJwtSecret, JwtSecretProvider, StaticJwtSecret};
pub use transport::{EngineTransport, HttpEngineTransport, TransportError};
#[cfg(any(test, feature = "test-utils"))]
pub use transport::MockEngineTransport;
