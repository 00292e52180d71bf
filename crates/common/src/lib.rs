//! Shared infrastructure for the beacon execution-engine client: logging setup, telemetry
//! sinks and the bounded retry driver.

pub mod logging;
pub mod metrics;
pub mod retry;
