//! Configuration for the execution-engine client, deserialised from TOML.

mod config;
mod engine;
mod logging;

pub use config::Config;
pub use engine::{EngineConfig, RetryConfig};
pub use logging::LoggingConfig;
