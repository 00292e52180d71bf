use alloy_primitives::B256;

use crate::{
    errors::PayloadStatusError,
    types::{PayloadStatusKind, PayloadStatusV1},
};

/// Maps a payload status onto the latest valid hash or a status error.
pub fn process_payload_status(status: &PayloadStatusV1) -> Result<Option<B256>, PayloadStatusError> {
    match status.status {
        PayloadStatusKind::Valid => Ok(status.latest_valid_hash),
        // Both mean the same thing, see execution-apis#270.
        PayloadStatusKind::Invalid | PayloadStatusKind::InvalidBlockHash => {
            Err(PayloadStatusError::Invalid {
                latest_valid_hash: status.latest_valid_hash,
                validation_error: status.validation_error.clone(),
            })
        }
        PayloadStatusKind::Syncing => Err(PayloadStatusError::Syncing),
        PayloadStatusKind::Accepted => Err(PayloadStatusError::Accepted),
        PayloadStatusKind::Unknown => Err(PayloadStatusError::Unknown),
    }
}
