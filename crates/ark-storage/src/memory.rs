use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use ark_crypto::{Digest, DigestAlgorithm, DigestEngine};
use ark_types::NodeId;

use crate::error::{StorageError, StorageResult};
use crate::node::{AipKey, NodeStatus, StorageNode};

struct Inner {
    objects: HashMap<AipKey, Vec<u8>>,
    capacity_bytes: u64,
    running: bool,
    reachable: bool,
    fail_writes: bool,
    latency: Duration,
}

impl Inner {
    fn used_bytes(&self) -> u64 {
        self.objects.values().map(|o| o.len() as u64).sum()
    }
}

/// In-memory storage node.
///
/// Intended for tests and embedding. Besides holding packages in a map it
/// supports fault injection: stopping the node, making it unreachable,
/// adding latency, failing writes and corrupting stored bytes.
pub struct InMemoryStorageNode {
    id: NodeId,
    engine: DigestEngine,
    inner: Mutex<Inner>,
}

impl InMemoryStorageNode {
    /// A running, reachable node with the given capacity.
    pub fn new(id: NodeId, capacity_bytes: u64) -> Self {
        Self {
            id,
            engine: DigestEngine::new(),
            inner: Mutex::new(Inner {
                objects: HashMap::new(),
                capacity_bytes,
                running: true,
                reachable: true,
                fail_writes: false,
                latency: Duration::ZERO,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("node lock poisoned")
    }

    pub fn set_capacity(&self, capacity_bytes: u64) {
        self.lock().capacity_bytes = capacity_bytes;
    }

    pub fn set_running(&self, running: bool) {
        self.lock().running = running;
    }

    /// An unreachable node refuses every call.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Delay applied before every call is answered.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Flip the first byte of a stored package. Returns `false` if the
    /// package is absent or empty.
    pub fn corrupt(&self, key: &AipKey) -> bool {
        let mut inner = self.lock();
        match inner.objects.get_mut(key).and_then(|o| o.first_mut()) {
            Some(byte) => {
                *byte ^= 0xff;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &AipKey) -> bool {
        self.lock().objects.contains_key(key)
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Wait out the configured latency, then check reachability.
    async fn answer(&self) -> StorageResult<()> {
        let (latency, reachable) = {
            let inner = self.lock();
            (inner.latency, inner.reachable)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !reachable {
            return Err(StorageError::Unavailable {
                node: self.id.clone(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageNode for InMemoryStorageNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn status(&self) -> StorageResult<NodeStatus> {
        self.answer().await?;
        let inner = self.lock();
        Ok(NodeStatus {
            capacity_bytes: inner.capacity_bytes,
            free_bytes: inner.capacity_bytes.saturating_sub(inner.used_bytes()),
            running: inner.running,
        })
    }

    async fn put_aip(&self, key: &AipKey, bytes: &[u8]) -> StorageResult<()> {
        self.answer().await?;
        let mut inner = self.lock();
        if inner.fail_writes || !inner.running {
            return Err(StorageError::Unavailable {
                node: self.id.clone(),
                reason: "write rejected".into(),
            });
        }
        let existing = inner.objects.get(key).map_or(0, |o| o.len() as u64);
        let free = inner
            .capacity_bytes
            .saturating_sub(inner.used_bytes() - existing);
        let needed = bytes.len() as u64;
        if needed > free {
            return Err(StorageError::Full {
                node: self.id.clone(),
                needed,
                free,
            });
        }
        inner.objects.insert(key.clone(), bytes.to_vec());
        Ok(())
    }

    async fn delete_aip(&self, key: &AipKey) -> StorageResult<bool> {
        self.answer().await?;
        Ok(self.lock().objects.remove(key).is_some())
    }

    async fn aip_digest(
        &self,
        key: &AipKey,
        algorithm: DigestAlgorithm,
    ) -> StorageResult<Option<Digest>> {
        self.answer().await?;
        let inner = self.lock();
        Ok(inner
            .objects
            .get(key)
            .map(|bytes| self.engine.digest_bytes(bytes, algorithm)))
    }
}

impl std::fmt::Debug for InMemoryStorageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorageNode")
            .field("id", &self.id)
            .field("object_count", &self.object_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_types::SipId;

    fn key(v: u32) -> AipKey {
        AipKey::new(SipId::new("sip").unwrap(), v)
    }

    fn node(cap: u64) -> InMemoryStorageNode {
        InMemoryStorageNode::new(NodeId::new("mem").unwrap(), cap)
    }

    #[tokio::test]
    async fn free_space_shrinks_with_writes() {
        let n = node(100);
        n.put_aip(&key(1), &[0u8; 30]).await.unwrap();
        let status = n.status().await.unwrap();
        assert_eq!(status.capacity_bytes, 100);
        assert_eq!(status.free_bytes, 70);
        assert!(status.running);
    }

    #[tokio::test]
    async fn overwrite_reuses_existing_space() {
        let n = node(50);
        n.put_aip(&key(1), &[0u8; 40]).await.unwrap();
        n.put_aip(&key(1), &[1u8; 45]).await.unwrap();
        assert_eq!(n.status().await.unwrap().free_bytes, 5);
    }

    #[tokio::test]
    async fn write_beyond_capacity_is_rejected() {
        let n = node(10);
        let err = n.put_aip(&key(1), &[0u8; 11]).await.unwrap_err();
        assert!(matches!(err, StorageError::Full { needed: 11, free: 10, .. }));
        assert!(!n.contains(&key(1)));
    }

    #[tokio::test]
    async fn digest_changes_after_corruption() {
        let n = node(100);
        n.put_aip(&key(1), b"package").await.unwrap();
        let before = n.aip_digest(&key(1), DigestAlgorithm::Sha256).await.unwrap();
        assert!(n.corrupt(&key(1)));
        let after = n.aip_digest(&key(1), DigestAlgorithm::Sha256).await.unwrap();
        assert_ne!(before, after);
        assert!(n.aip_digest(&key(2), DigestAlgorithm::Sha256).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreachable_node_refuses_calls() {
        let n = node(100);
        n.set_reachable(false);
        assert!(matches!(
            n.status().await.unwrap_err(),
            StorageError::Unavailable { .. }
        ));
    }

    #[tokio::test]
    async fn failing_writes_leave_nothing_behind() {
        let n = node(100);
        n.set_fail_writes(true);
        assert!(n.put_aip(&key(1), b"x").await.is_err());
        assert_eq!(n.object_count(), 0);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let n = node(100);
        n.put_aip(&key(1), b"x").await.unwrap();
        assert!(n.delete_aip(&key(1)).await.unwrap());
        assert!(!n.delete_aip(&key(1)).await.unwrap());
    }
}
