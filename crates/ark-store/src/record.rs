use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use ark_crypto::Digest;
use ark_types::{BatchId, BatchState, SipId, Timestamp};

/// Registration of a SIP with the ingest system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SipRecord {
    pub sip_id: SipId,
    pub batch_id: BatchId,
    /// Where the submitted content is read from.
    pub source: PathBuf,
    pub registered_at: Timestamp,
}

impl SipRecord {
    pub fn new(sip_id: SipId, batch_id: BatchId, source: impl Into<PathBuf>) -> Self {
        Self {
            sip_id,
            batch_id,
            source: source.into(),
            registered_at: Timestamp::now(),
        }
    }
}

/// Persisted view of a batch. Batches are never deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: BatchId,
    /// SIPs in processing order.
    pub sips: Vec<SipId>,
    pub state: BatchState,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl BatchRecord {
    pub fn new(batch_id: BatchId, sips: Vec<SipId>) -> Self {
        let now = Timestamp::now();
        Self {
            batch_id,
            sips,
            state: BatchState::New,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One AIP metadata version of a SIP.
///
/// `digest` is the digest of the encoded AIP package; it is absent for a
/// version that was claimed without a package. `stored_at` is set once the
/// package is durably written to every replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AipVersionRecord {
    pub sip_id: SipId,
    pub version: u32,
    pub digest: Option<Digest>,
    pub created_at: Timestamp,
    pub stored_at: Option<Timestamp>,
}

impl AipVersionRecord {
    pub fn is_stored(&self) -> bool {
        self.stored_at.is_some()
    }
}
