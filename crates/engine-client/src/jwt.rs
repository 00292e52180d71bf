//! Sources of the shared secret used to authenticate with the execution client.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use alloy_rpc_types_engine::{Claims, JwtSecret};

use crate::transport::TransportError;

/// Provides the current JWT secret.
///
/// Implementations may return a different secret on each call, which is how rotation is
/// picked up by the periodic auth refresh.
pub trait JwtSecretProvider: Send + Sync + fmt::Debug {
    fn secret(&self) -> Result<JwtSecret, TransportError>;
}

/// A secret fixed at construction.
#[derive(Clone)]
pub struct StaticJwtSecret(JwtSecret);

impl fmt::Debug for StaticJwtSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticJwtSecret(..)")
    }
}

impl StaticJwtSecret {
    pub fn new(secret: JwtSecret) -> Self {
        Self(secret)
    }

    pub fn from_hex(hex: &str) -> Result<Self, TransportError> {
        JwtSecret::from_hex(hex)
            .map(Self)
            .map_err(|e| TransportError::Auth(e.to_string()))
    }
}

impl JwtSecretProvider for StaticJwtSecret {
    fn secret(&self) -> Result<JwtSecret, TransportError> {
        Ok(self.0)
    }
}

/// Reads the hex-encoded secret from disk on every call.
#[derive(Debug, Clone)]
pub struct FileJwtSecret {
    path: PathBuf,
}

impl FileJwtSecret {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JwtSecretProvider for FileJwtSecret {
    fn secret(&self) -> Result<JwtSecret, TransportError> {
        JwtSecret::from_file(&self.path).map_err(|e| {
            TransportError::Auth(format!("reading jwt secret {}: {e}", self.path.display()))
        })
    }
}

/// Produces a fresh bearer token signed with the provider's current secret.
pub fn bearer_token(provider: &dyn JwtSecretProvider) -> Result<String, TransportError> {
    let secret = provider.secret()?;
    let iat = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| TransportError::Auth(e.to_string()))?
        .as_secs();
    let token = secret
        .encode(&Claims { iat, exp: None })
        .map_err(|e| TransportError::Auth(e.to_string()))?;
    Ok(format!("Bearer {token}"))
}
