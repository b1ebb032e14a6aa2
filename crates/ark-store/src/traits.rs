use ark_types::{BatchId, SipId};

use crate::error::StoreResult;
use crate::record::{AipVersionRecord, BatchRecord, SipRecord};

/// Persistence collaborator for ingest records.
///
/// Implementations must be thread-safe and make each call atomic. The
/// allocator relies on `max_version` followed by `save_version` being
/// consistent while it holds its per-SIP lock; implementations need no
/// locking of their own beyond that.
pub trait IngestRepository: Send + Sync {
    /// Look up a registered SIP. Returns `Ok(None)` if it is unknown.
    fn find_sip(&self, sip_id: &SipId) -> StoreResult<Option<SipRecord>>;

    /// Register or re-register a SIP (re-ingest points it at a new batch).
    fn save_sip(&self, record: &SipRecord) -> StoreResult<()>;

    /// Look up a batch. Returns `Ok(None)` if it is unknown.
    fn find_batch(&self, batch_id: &BatchId) -> StoreResult<Option<BatchRecord>>;

    /// Create or update a batch record.
    fn save_batch(&self, record: &BatchRecord) -> StoreResult<()>;

    /// All batch records, oldest first.
    fn list_batches(&self) -> StoreResult<Vec<BatchRecord>>;

    /// Highest version recorded for the SIP, or `None` if it has none.
    fn max_version(&self, sip_id: &SipId) -> StoreResult<Option<u32>>;

    /// Create or update a version record keyed by `(sip_id, version)`.
    fn save_version(&self, record: &AipVersionRecord) -> StoreResult<()>;

    /// All version records of a SIP in ascending version order.
    fn versions(&self, sip_id: &SipId) -> StoreResult<Vec<AipVersionRecord>>;

    /// A single version record.
    fn find_version(&self, sip_id: &SipId, version: u32) -> StoreResult<Option<AipVersionRecord>> {
        Ok(self
            .versions(sip_id)?
            .into_iter()
            .find(|r| r.version == version))
    }

    /// The highest version whose package has been stored on every replica.
    fn latest_stored_version(&self, sip_id: &SipId) -> StoreResult<Option<AipVersionRecord>> {
        Ok(self
            .versions(sip_id)?
            .into_iter()
            .rev()
            .find(AipVersionRecord::is_stored))
    }
}
