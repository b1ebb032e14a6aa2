use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use ark_types::{BatchId, SipId};

use crate::error::StoreResult;
use crate::record::{AipVersionRecord, BatchRecord, SipRecord};
use crate::traits::IngestRepository;

/// In-memory, map-based ingest repository.
///
/// Intended for tests and embedding. Every table sits behind its own
/// `RwLock`; records are cloned on read and write.
pub struct InMemoryRepository {
    sips: RwLock<HashMap<SipId, SipRecord>>,
    batches: RwLock<HashMap<BatchId, BatchRecord>>,
    versions: RwLock<HashMap<SipId, BTreeMap<u32, AipVersionRecord>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            sips: RwLock::new(HashMap::new()),
            batches: RwLock::new(HashMap::new()),
            versions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of registered SIPs.
    pub fn sip_count(&self) -> usize {
        self.sips.read().expect("lock poisoned").len()
    }

    /// Total number of version records across all SIPs.
    pub fn version_count(&self) -> usize {
        self.versions
            .read()
            .expect("lock poisoned")
            .values()
            .map(BTreeMap::len)
            .sum()
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestRepository for InMemoryRepository {
    fn find_sip(&self, sip_id: &SipId) -> StoreResult<Option<SipRecord>> {
        let map = self.sips.read().expect("lock poisoned");
        Ok(map.get(sip_id).cloned())
    }

    fn save_sip(&self, record: &SipRecord) -> StoreResult<()> {
        let mut map = self.sips.write().expect("lock poisoned");
        map.insert(record.sip_id.clone(), record.clone());
        Ok(())
    }

    fn find_batch(&self, batch_id: &BatchId) -> StoreResult<Option<BatchRecord>> {
        let map = self.batches.read().expect("lock poisoned");
        Ok(map.get(batch_id).cloned())
    }

    fn save_batch(&self, record: &BatchRecord) -> StoreResult<()> {
        let mut map = self.batches.write().expect("lock poisoned");
        map.insert(record.batch_id, record.clone());
        Ok(())
    }

    fn list_batches(&self) -> StoreResult<Vec<BatchRecord>> {
        let map = self.batches.read().expect("lock poisoned");
        let mut batches: Vec<BatchRecord> = map.values().cloned().collect();
        batches.sort_by_key(|b| b.batch_id);
        Ok(batches)
    }

    fn max_version(&self, sip_id: &SipId) -> StoreResult<Option<u32>> {
        let map = self.versions.read().expect("lock poisoned");
        Ok(map
            .get(sip_id)
            .and_then(|versions| versions.keys().next_back().copied()))
    }

    fn save_version(&self, record: &AipVersionRecord) -> StoreResult<()> {
        let mut map = self.versions.write().expect("lock poisoned");
        map.entry(record.sip_id.clone())
            .or_default()
            .insert(record.version, record.clone());
        Ok(())
    }

    fn versions(&self, sip_id: &SipId) -> StoreResult<Vec<AipVersionRecord>> {
        let map = self.versions.read().expect("lock poisoned");
        Ok(map
            .get(sip_id)
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for InMemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("sip_count", &self.sip_count())
            .field("version_count", &self.version_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_types::{BatchState, Timestamp};

    fn sip(name: &str) -> SipId {
        SipId::new(name).unwrap()
    }

    fn version(sip_id: &SipId, version: u32, stored: bool) -> AipVersionRecord {
        AipVersionRecord {
            sip_id: sip_id.clone(),
            version,
            digest: None,
            created_at: Timestamp::now(),
            stored_at: stored.then(Timestamp::now),
        }
    }

    #[test]
    fn save_and_find_sip() {
        let repo = InMemoryRepository::new();
        let record = SipRecord::new(sip("s1"), BatchId::new(), "/in/s1");
        repo.save_sip(&record).unwrap();
        assert_eq!(repo.find_sip(&sip("s1")).unwrap(), Some(record));
        assert!(repo.find_sip(&sip("s2")).unwrap().is_none());
    }

    #[test]
    fn re_registering_a_sip_replaces_it() {
        let repo = InMemoryRepository::new();
        repo.save_sip(&SipRecord::new(sip("s1"), BatchId::new(), "/a")).unwrap();
        let second = BatchId::new();
        repo.save_sip(&SipRecord::new(sip("s1"), second, "/b")).unwrap();
        assert_eq!(repo.find_sip(&sip("s1")).unwrap().unwrap().batch_id, second);
        assert_eq!(repo.sip_count(), 1);
    }

    #[test]
    fn batch_records_update_in_place() {
        let repo = InMemoryRepository::new();
        let mut record = BatchRecord::new(BatchId::new(), vec![sip("a"), sip("b")]);
        repo.save_batch(&record).unwrap();
        record.state = BatchState::Running;
        repo.save_batch(&record).unwrap();
        let found = repo.find_batch(&record.batch_id).unwrap().unwrap();
        assert_eq!(found.state, BatchState::Running);
        assert_eq!(repo.list_batches().unwrap().len(), 1);
    }

    #[test]
    fn max_version_tracks_highest() {
        let repo = InMemoryRepository::new();
        let s = sip("s1");
        assert_eq!(repo.max_version(&s).unwrap(), None);
        repo.save_version(&version(&s, 1, true)).unwrap();
        repo.save_version(&version(&s, 2, false)).unwrap();
        assert_eq!(repo.max_version(&s).unwrap(), Some(2));
        let versions: Vec<u32> = repo.versions(&s).unwrap().iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn latest_stored_version_skips_unstored() {
        let repo = InMemoryRepository::new();
        let s = sip("s1");
        repo.save_version(&version(&s, 1, true)).unwrap();
        repo.save_version(&version(&s, 2, true)).unwrap();
        repo.save_version(&version(&s, 3, false)).unwrap();
        let latest = repo.latest_stored_version(&s).unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(repo.find_version(&s, 3).unwrap().unwrap().version, 3);
        assert!(repo.find_version(&s, 4).unwrap().is_none());
    }
}
