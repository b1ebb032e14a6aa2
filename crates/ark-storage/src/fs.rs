use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use ark_crypto::{Digest, DigestAlgorithm, DigestEngine};
use ark_types::NodeId;

use crate::error::{StorageError, StorageResult};
use crate::node::{AipKey, NodeStatus, StorageNode};

/// Suffix of in-progress writes; never visible under a package key.
const PARTIAL_SUFFIX: &str = ".partial";

/// Directory-backed storage node.
///
/// Packages live at `<root>/<sip>/v<version>.aip`. Capacity is declared in
/// configuration; free space is the declared capacity minus the bytes
/// currently under `root`. Writes go to a `.partial` file first and are
/// renamed into place, so a failed write never leaves a readable package.
pub struct FsStorageNode {
    id: NodeId,
    root: PathBuf,
    capacity_bytes: u64,
    engine: DigestEngine,
}

impl FsStorageNode {
    /// Open (creating if needed) a node rooted at `root`.
    pub fn open(id: NodeId, root: impl Into<PathBuf>, capacity_bytes: u64) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let swept = Self::sweep_partials(&root)?;
        debug!(node = %id, root = %root.display(), capacity_bytes, swept, "opened filesystem node");
        Ok(Self {
            id,
            root,
            capacity_bytes,
            engine: DigestEngine::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &AipKey) -> PathBuf {
        self.root.join(key.object_path())
    }

    fn partial_for(target: &Path) -> PathBuf {
        target.with_extension(format!("aip{PARTIAL_SUFFIX}"))
    }

    /// Remove writes abandoned by an earlier process.
    fn sweep_partials(root: &Path) -> StorageResult<usize> {
        let partials: Vec<PathBuf> = WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX))
            .map(|e| e.into_path())
            .collect();
        for path in &partials {
            std::fs::remove_file(path)?;
        }
        Ok(partials.len())
    }

    fn used_bytes(root: &Path) -> u64 {
        WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    async fn blocking<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> StorageResult<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

#[async_trait]
impl StorageNode for FsStorageNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn status(&self) -> StorageResult<NodeStatus> {
        let root = self.root.clone();
        let capacity_bytes = self.capacity_bytes;
        self.blocking(move || {
            let running = root.is_dir();
            let used = if running { Self::used_bytes(&root) } else { 0 };
            Ok(NodeStatus {
                capacity_bytes,
                free_bytes: capacity_bytes.saturating_sub(used),
                running,
            })
        })
        .await
    }

    async fn put_aip(&self, key: &AipKey, bytes: &[u8]) -> StorageResult<()> {
        let status = self.status().await?;
        if !status.running {
            return Err(StorageError::Unavailable {
                node: self.id.clone(),
                reason: format!("root {} is missing", self.root.display()),
            });
        }
        let target = self.path_for(key);
        let existing = tokio::fs::metadata(&target).await.map_or(0, |m| m.len());
        let free = status.free_bytes + existing;
        let needed = bytes.len() as u64;
        if needed > free {
            return Err(StorageError::Full {
                node: self.id.clone(),
                needed,
                free,
            });
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = Self::partial_for(&target);
        let written = async {
            tokio::fs::write(&partial, bytes).await?;
            tokio::fs::rename(&partial, &target).await
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }
        debug!(node = %self.id, key = %key, bytes = needed, "stored package");
        Ok(())
    }

    async fn delete_aip(&self, key: &AipKey) -> StorageResult<bool> {
        let target = self.path_for(key);
        // A write abandoned on timeout may still hold its partial file.
        match tokio::fs::remove_file(Self::partial_for(&target)).await {
            Ok(()) => debug!(node = %self.id, key = %key, "removed partial write"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn aip_digest(
        &self,
        key: &AipKey,
        algorithm: DigestAlgorithm,
    ) -> StorageResult<Option<Digest>> {
        let path = self.path_for(key);
        let engine = self.engine.clone();
        self.blocking(move || {
            if !path.is_file() {
                return Ok(None);
            }
            Ok(Some(engine.digest(&path, algorithm)?))
        })
        .await
    }
}

impl std::fmt::Debug for FsStorageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsStorageNode")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("capacity_bytes", &self.capacity_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_types::SipId;

    fn key(v: u32) -> AipKey {
        AipKey::new(SipId::new("sip-1").unwrap(), v)
    }

    fn open(dir: &tempfile::TempDir, cap: u64) -> FsStorageNode {
        FsStorageNode::open(NodeId::new("fs").unwrap(), dir.path().join("node"), cap).unwrap()
    }

    #[tokio::test]
    async fn write_then_digest_matches_engine() {
        let dir = tempfile::tempdir().unwrap();
        let node = open(&dir, 1024);
        node.put_aip(&key(1), b"aip bytes").await.unwrap();

        assert!(node.root().join("sip-1/v1.aip").is_file());
        let digest = node
            .aip_digest(&key(1), DigestAlgorithm::Blake3)
            .await
            .unwrap()
            .unwrap();
        let expected = DigestEngine::new().digest_bytes(b"aip bytes", DigestAlgorithm::Blake3);
        assert_eq!(digest, expected);
    }

    #[tokio::test]
    async fn status_reports_declared_capacity_minus_usage() {
        let dir = tempfile::tempdir().unwrap();
        let node = open(&dir, 1000);
        node.put_aip(&key(1), &[7u8; 300]).await.unwrap();
        let status = node.status().await.unwrap();
        assert!(status.running);
        assert_eq!(status.capacity_bytes, 1000);
        assert_eq!(status.free_bytes, 700);
    }

    #[tokio::test]
    async fn oversized_write_is_rejected_and_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let node = open(&dir, 10);
        let err = node.put_aip(&key(1), &[0u8; 11]).await.unwrap_err();
        assert!(matches!(err, StorageError::Full { .. }));
        assert!(node.aip_digest(&key(1), DigestAlgorithm::Sha256).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_root_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let node = open(&dir, 10);
        std::fs::remove_dir_all(node.root()).unwrap();
        assert!(!node.status().await.unwrap().running);
        assert!(node.put_aip(&key(1), b"x").await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_package() {
        let dir = tempfile::tempdir().unwrap();
        let node = open(&dir, 100);
        node.put_aip(&key(2), b"x").await.unwrap();
        assert!(node.delete_aip(&key(2)).await.unwrap());
        assert!(!node.delete_aip(&key(2)).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_abandoned_partial_write() {
        let dir = tempfile::tempdir().unwrap();
        let node = open(&dir, 100);
        let partial = node.root().join("sip-1/v3.aip.partial");
        std::fs::create_dir_all(partial.parent().unwrap()).unwrap();
        std::fs::write(&partial, [1u8; 40]).unwrap();
        assert_eq!(node.status().await.unwrap().free_bytes, 60);

        assert!(!node.delete_aip(&key(3)).await.unwrap());
        assert!(!partial.exists());
        assert_eq!(node.status().await.unwrap().free_bytes, 100);
    }

    #[tokio::test]
    async fn open_sweeps_stale_partials() {
        let dir = tempfile::tempdir().unwrap();
        let node = open(&dir, 100);
        node.put_aip(&key(1), b"kept").await.unwrap();
        let stale = node.root().join("sip-1/v2.aip.partial");
        std::fs::write(&stale, b"half").unwrap();
        drop(node);

        let node = open(&dir, 100);
        assert!(!stale.exists());
        assert!(node.root().join("sip-1/v1.aip").is_file());
        assert_eq!(node.status().await.unwrap().free_bytes, 96);
    }
}
