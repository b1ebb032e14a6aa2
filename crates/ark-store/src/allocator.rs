use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use ark_crypto::Digest;
use ark_types::{SipId, Timestamp};

use crate::error::{StoreError, StoreResult};
use crate::record::AipVersionRecord;
use crate::traits::IngestRepository;

/// Hands out the next AIP metadata version per SIP.
///
/// Same-SIP requests are serialized by a per-SIP async lock, held across
/// the read of the current maximum and the write of the claimed record.
/// Requests for different SIPs only touch the lock table for the instant it
/// takes to look up their entry, so they proceed in parallel.
pub struct AipVersionAllocator {
    repository: Arc<dyn IngestRepository>,
    locks: Mutex<HashMap<SipId, Arc<tokio::sync::Mutex<()>>>>,
}

impl AipVersionAllocator {
    pub fn new(repository: Arc<dyn IngestRepository>) -> Self {
        Self {
            repository,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The repository this allocator writes to.
    pub fn repository(&self) -> &Arc<dyn IngestRepository> {
        &self.repository
    }

    /// Claim the next version number for `sip_id`.
    ///
    /// The claim is persisted as a version record without a digest, so two
    /// sequential calls return `1` and then `2`.
    pub async fn next_version(&self, sip_id: &SipId) -> StoreResult<u32> {
        Ok(self.allocate(sip_id, None).await?.version)
    }

    /// Claim the next version for `sip_id` and record the package digest.
    ///
    /// Fails with [`StoreError::MissingObject`] if the SIP is not registered.
    pub async fn allocate(
        &self,
        sip_id: &SipId,
        digest: Option<Digest>,
    ) -> StoreResult<AipVersionRecord> {
        self.with_sip_lock(sip_id, || {
            if self.repository.find_sip(sip_id)?.is_none() {
                return Err(StoreError::MissingObject(sip_id.clone()));
            }
            let version = self.repository.max_version(sip_id)?.unwrap_or(0) + 1;
            let record = AipVersionRecord {
                sip_id: sip_id.clone(),
                version,
                digest,
                created_at: Timestamp::now(),
                stored_at: None,
            };
            self.repository.save_version(&record)?;
            debug!(sip = %sip_id, version, "allocated AIP version");
            Ok(record)
        })
        .await
    }

    /// Attach the package digest to a claimed version.
    pub async fn record_digest(
        &self,
        sip_id: &SipId,
        version: u32,
        digest: Digest,
    ) -> StoreResult<AipVersionRecord> {
        self.update_version(sip_id, version, |record| record.digest = Some(digest))
            .await
    }

    /// Mark a version as durably stored on every replica.
    pub async fn mark_stored(&self, sip_id: &SipId, version: u32) -> StoreResult<AipVersionRecord> {
        self.update_version(sip_id, version, |record| {
            record.stored_at = Some(Timestamp::now())
        })
        .await
    }

    async fn update_version(
        &self,
        sip_id: &SipId,
        version: u32,
        update: impl FnOnce(&mut AipVersionRecord),
    ) -> StoreResult<AipVersionRecord> {
        self.with_sip_lock(sip_id, || {
            let mut record = self
                .repository
                .find_version(sip_id, version)?
                .ok_or_else(|| StoreError::VersionNotFound {
                    sip_id: sip_id.clone(),
                    version,
                })?;
            update(&mut record);
            self.repository.save_version(&record)?;
            Ok(record)
        })
        .await
    }

    /// Run `f` inside the critical section for `sip_id`.
    async fn with_sip_lock<T>(
        &self,
        sip_id: &SipId,
        f: impl FnOnce() -> StoreResult<T>,
    ) -> StoreResult<T> {
        let lock = {
            let mut locks = self.locks.lock().expect("lock table poisoned");
            Arc::clone(locks.entry(sip_id.clone()).or_default())
        };

        let result = {
            let _guard = lock.lock().await;
            f()
        };

        // Drop the table entry once nobody else is waiting on it.
        let mut locks = self.locks.lock().expect("lock table poisoned");
        if Arc::strong_count(&lock) == 2 {
            locks.remove(sip_id);
        }
        result
    }

    /// Number of SIPs with a live lock entry (for diagnostics and tests).
    pub fn active_locks(&self) -> usize {
        self.locks.lock().expect("lock table poisoned").len()
    }
}

impl std::fmt::Debug for AipVersionAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AipVersionAllocator")
            .field("active_locks", &self.active_locks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRepository;
    use crate::record::{BatchRecord, SipRecord};
    use ark_types::BatchId;
    use std::collections::HashSet;

    fn sip(name: &str) -> SipId {
        SipId::new(name).unwrap()
    }

    fn registered(names: &[&str]) -> (Arc<InMemoryRepository>, AipVersionAllocator) {
        let repo = Arc::new(InMemoryRepository::new());
        let batch = BatchId::new();
        for name in names {
            repo.save_sip(&SipRecord::new(sip(name), batch, format!("/in/{name}")))
                .unwrap();
        }
        let allocator = AipVersionAllocator::new(repo.clone());
        (repo, allocator)
    }

    /// Repository whose version writes always fail.
    struct BrokenVersions(InMemoryRepository);

    impl IngestRepository for BrokenVersions {
        fn find_sip(&self, id: &SipId) -> StoreResult<Option<SipRecord>> {
            self.0.find_sip(id)
        }
        fn save_sip(&self, r: &SipRecord) -> StoreResult<()> {
            self.0.save_sip(r)
        }
        fn find_batch(&self, id: &BatchId) -> StoreResult<Option<BatchRecord>> {
            self.0.find_batch(id)
        }
        fn save_batch(&self, r: &BatchRecord) -> StoreResult<()> {
            self.0.save_batch(r)
        }
        fn list_batches(&self) -> StoreResult<Vec<BatchRecord>> {
            self.0.list_batches()
        }
        fn max_version(&self, id: &SipId) -> StoreResult<Option<u32>> {
            self.0.max_version(id)
        }
        fn save_version(&self, _: &AipVersionRecord) -> StoreResult<()> {
            Err(StoreError::Backend("disk full".into()))
        }
        fn versions(&self, id: &SipId) -> StoreResult<Vec<AipVersionRecord>> {
            self.0.versions(id)
        }
    }

    #[tokio::test]
    async fn sequential_calls_count_up_from_one() {
        let (_, allocator) = registered(&["sip-42"]);
        assert_eq!(allocator.next_version(&sip("sip-42")).await.unwrap(), 1);
        assert_eq!(allocator.next_version(&sip("sip-42")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unregistered_sip_is_missing_object() {
        let (_, allocator) = registered(&["sip-42"]);
        let err = allocator.next_version(&sip("sip-missing")).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingObject(id) if id.as_str() == "sip-missing"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_yield_contiguous_versions() {
        let (repo, allocator) = registered(&["sip-1"]);
        let allocator = Arc::new(allocator);
        let n = 64;

        let mut handles = Vec::new();
        for _ in 0..n {
            let allocator = Arc::clone(&allocator);
            handles.push(tokio::spawn(async move {
                allocator.next_version(&sip("sip-1")).await.unwrap()
            }));
        }
        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap());
        }
        versions.sort_unstable();

        assert_eq!(versions, (1..=n).collect::<Vec<u32>>());
        assert_eq!(repo.max_version(&sip("sip-1")).unwrap(), Some(n));
        assert_eq!(allocator.active_locks(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn different_sips_have_independent_sequences() {
        let (_, allocator) = registered(&["a", "b", "c"]);
        let allocator = Arc::new(allocator);

        let mut handles = Vec::new();
        for name in ["a", "b", "c"] {
            for _ in 0..10 {
                let allocator = Arc::clone(&allocator);
                handles.push(tokio::spawn(async move {
                    (name, allocator.next_version(&sip(name)).await.unwrap())
                }));
            }
        }
        let mut seen: HashSet<(&str, u32)> = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
        for name in ["a", "b", "c"] {
            for v in 1..=10 {
                assert!(seen.contains(&(name, v)));
            }
        }
    }

    #[tokio::test]
    async fn allocate_records_digest_and_mark_stored_sets_timestamp() {
        let (repo, allocator) = registered(&["s"]);
        let digest = ark_crypto::DigestEngine::new()
            .digest_bytes(b"package", ark_crypto::DigestAlgorithm::Sha256);
        let record = allocator.allocate(&sip("s"), Some(digest.clone())).await.unwrap();
        assert_eq!(record.version, 1);
        assert!(!record.is_stored());
        assert!(repo.latest_stored_version(&sip("s")).unwrap().is_none());

        let stored = allocator.mark_stored(&sip("s"), 1).await.unwrap();
        assert!(stored.is_stored());
        assert_eq!(stored.digest, Some(digest));
        assert_eq!(repo.latest_stored_version(&sip("s")).unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn digest_can_be_recorded_after_claim() {
        let (repo, allocator) = registered(&["s"]);
        let version = allocator.next_version(&sip("s")).await.unwrap();
        let digest = ark_crypto::DigestEngine::new()
            .digest_bytes(b"late", ark_crypto::DigestAlgorithm::Blake3);
        allocator
            .record_digest(&sip("s"), version, digest.clone())
            .await
            .unwrap();
        let record = repo.find_version(&sip("s"), version).unwrap().unwrap();
        assert_eq!(record.digest, Some(digest));
        assert!(!record.is_stored());
    }

    #[tokio::test]
    async fn mark_stored_unknown_version_fails() {
        let (_, allocator) = registered(&["s"]);
        let err = allocator.mark_stored(&sip("s"), 7).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionNotFound { version: 7, .. }));
    }

    #[tokio::test]
    async fn backend_failure_is_propagated_not_retried() {
        let inner = InMemoryRepository::new();
        inner
            .save_sip(&SipRecord::new(sip("s"), BatchId::new(), "/in/s"))
            .unwrap();
        let allocator = AipVersionAllocator::new(Arc::new(BrokenVersions(inner)));
        let err = allocator.next_version(&sip("s")).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(allocator.active_locks(), 0);
    }
}
