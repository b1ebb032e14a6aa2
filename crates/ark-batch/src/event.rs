use serde::{Deserialize, Serialize};

use ark_fixity::FixityResult;
use ark_types::{BatchId, BatchState, SipId};

use crate::unit::{Stage, UnitState};

/// Notifications broadcast by the coordinator for alerting and audit.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    BatchStateChanged {
        batch_id: BatchId,
        state: BatchState,
    },
    UnitStateChanged {
        batch_id: BatchId,
        sip_id: SipId,
        state: UnitState,
    },
    UnitFailed {
        batch_id: BatchId,
        sip_id: SipId,
        stage: Stage,
        message: String,
    },
    /// A submitted checksum or a storage replica disagrees with the
    /// expected digest.
    FixityMismatch {
        batch_id: BatchId,
        sip_id: SipId,
        result: FixityResult,
    },
}

impl BatchEvent {
    pub fn batch_id(&self) -> BatchId {
        match self {
            Self::BatchStateChanged { batch_id, .. }
            | Self::UnitStateChanged { batch_id, .. }
            | Self::UnitFailed { batch_id, .. }
            | Self::FixityMismatch { batch_id, .. } => *batch_id,
        }
    }
}
