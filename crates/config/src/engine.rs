use std::{path::PathBuf, time::Duration};

use beacon_common::retry::policies::ExponentialBackoff;
use serde::{Deserialize, Serialize};

/// Default value for `rpc_dial_url` in [`EngineConfig`].
const DEFAULT_RPC_DIAL_URL: &str = "http://localhost:8551";

/// Default per-call deadline for engine calls, in ms.
const DEFAULT_RPC_TIMEOUT_MS: u64 = 900;

/// Default HTTP request timeout of the transport, in ms.
const DEFAULT_RPC_HTTP_TIMEOUT_MS: u64 = 2_000;

/// Default interval between startup verification attempts, in ms.
const DEFAULT_RPC_STARTUP_CHECK_INTERVAL_MS: u64 = 3_000;

/// Default interval between JWT refreshes, in ms.
const DEFAULT_RPC_JWT_REFRESH_INTERVAL_MS: u64 = 30_000;

/// Default chain id the execution client must report.
const DEFAULT_REQUIRED_CHAIN_ID: u64 = 80087;

const DEFAULT_RETRY_CALL_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;
const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
const DEFAULT_RETRY_JITTER: f64 = 0.1;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;
const DEFAULT_RETRY_OVERALL_TIMEOUT_MS: u64 = 60_000;

fn default_rpc_dial_url() -> String {
    DEFAULT_RPC_DIAL_URL.to_string()
}

fn default_rpc_timeout_ms() -> u64 {
    DEFAULT_RPC_TIMEOUT_MS
}

fn default_rpc_http_timeout_ms() -> u64 {
    DEFAULT_RPC_HTTP_TIMEOUT_MS
}

fn default_rpc_startup_check_interval_ms() -> u64 {
    DEFAULT_RPC_STARTUP_CHECK_INTERVAL_MS
}

fn default_rpc_jwt_refresh_interval_ms() -> u64 {
    DEFAULT_RPC_JWT_REFRESH_INTERVAL_MS
}

fn default_required_chain_id() -> u64 {
    DEFAULT_REQUIRED_CHAIN_ID
}

fn default_retry_call_timeout_ms() -> u64 {
    DEFAULT_RETRY_CALL_TIMEOUT_MS
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_retry_multiplier() -> f64 {
    DEFAULT_RETRY_MULTIPLIER
}

fn default_retry_jitter() -> f64 {
    DEFAULT_RETRY_JITTER
}

fn default_retry_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}

fn default_retry_overall_timeout_ms() -> u64 {
    DEFAULT_RETRY_OVERALL_TIMEOUT_MS
}

/// Connection settings for the execution client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine API endpoint, http(s) only.
    #[serde(default = "default_rpc_dial_url")]
    pub rpc_dial_url: String,

    /// Deadline applied to every engine call, in ms.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Request timeout of the underlying HTTP client, in ms.
    #[serde(default = "default_rpc_http_timeout_ms")]
    pub rpc_http_timeout_ms: u64,

    /// Fixed interval between verification attempts during startup, in ms.
    #[serde(default = "default_rpc_startup_check_interval_ms")]
    pub rpc_startup_check_interval_ms: u64,

    /// Interval between auth token refreshes, in ms.
    #[serde(default = "default_rpc_jwt_refresh_interval_ms")]
    pub rpc_jwt_refresh_interval_ms: u64,

    /// Path to the hex-encoded JWT secret shared with the execution client.
    #[serde(default)]
    pub jwt_secret_path: Option<PathBuf>,

    /// Chain id the execution client must report.
    #[serde(default = "default_required_chain_id")]
    pub required_chain_id: u64,

    /// Backoff parameters for health waits.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_dial_url: default_rpc_dial_url(),
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            rpc_http_timeout_ms: DEFAULT_RPC_HTTP_TIMEOUT_MS,
            rpc_startup_check_interval_ms: DEFAULT_RPC_STARTUP_CHECK_INTERVAL_MS,
            rpc_jwt_refresh_interval_ms: DEFAULT_RPC_JWT_REFRESH_INTERVAL_MS,
            jwt_secret_path: None,
            required_chain_id: DEFAULT_REQUIRED_CHAIN_ID,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn rpc_http_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_http_timeout_ms)
    }

    pub fn rpc_startup_check_interval(&self) -> Duration {
        Duration::from_millis(self.rpc_startup_check_interval_ms)
    }

    pub fn rpc_jwt_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.rpc_jwt_refresh_interval_ms)
    }

    /// Whether the dial url uses an http(s) scheme.
    pub fn is_http(&self) -> bool {
        let url = self.rpc_dial_url.to_ascii_lowercase();
        url.starts_with("http://") || url.starts_with("https://")
    }
}

/// Backoff parameters, see [`ExponentialBackoff`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Timeout of a single attempt, in ms.
    #[serde(default = "default_retry_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Delay before the first retry, in ms.
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Growth factor between attempts.
    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,

    /// Symmetric jitter fraction in `[0, 1]`.
    #[serde(default = "default_retry_jitter")]
    pub jitter: f64,

    /// Upper bound on a single delay, in ms.
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Deadline for the whole retry operation, in ms.
    #[serde(default = "default_retry_overall_timeout_ms")]
    pub overall_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: DEFAULT_RETRY_CALL_TIMEOUT_MS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            jitter: DEFAULT_RETRY_JITTER,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            overall_timeout_ms: DEFAULT_RETRY_OVERALL_TIMEOUT_MS,
        }
    }
}

impl RetryConfig {
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.call_timeout_ms),
            Duration::from_millis(self.base_delay_ms),
            self.multiplier,
            self.jitter,
            Duration::from_millis(self.max_delay_ms),
            Duration::from_millis(self.overall_timeout_ms),
        )
    }
}
