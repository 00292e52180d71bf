//! Execution engine adapter: runs the three engine operations on top of the
//! [`beacon_engine_client::EngineClient`] and applies per-operation status policy.

mod engine;
mod errors;
mod metrics;
mod requests;

pub use engine::ExecutionEngine;
pub use errors::{ExecutionEngineError, ExecutionEngineResult, PayloadVerificationError};
pub use metrics::keys;
pub use requests::{ForkchoiceUpdateRequest, GetPayloadRequest, NewPayloadRequest};
