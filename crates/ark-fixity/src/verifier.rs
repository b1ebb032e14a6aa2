use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use ark_crypto::{Digest, DigestAlgorithm, DigestEngine};
use ark_storage::{AipKey, StorageStateAggregator};
use ark_store::IngestRepository;
use ark_types::{NodeId, SipId, Timestamp};

use crate::error::{FixityError, VerifyResult};
use crate::manifest::SubmittedManifest;
use crate::result::{FixityResult, FixitySubject};

/// Computes and cross-checks content fixity.
///
/// Local checks stream files through the [`DigestEngine`]. The aggregated
/// check asks every configured storage node for the digest of the latest
/// stored AIP of a SIP and requires all of them to agree with the recorded
/// digest. Disagreement is never resolved by majority: one divergent or
/// unreachable replica makes the whole result unmatched.
pub struct FixityVerifier {
    engine: DigestEngine,
    aggregator: Arc<StorageStateAggregator>,
    repository: Arc<dyn IngestRepository>,
}

/// What one replica said about a package digest.
enum ReplicaAnswer {
    Digest(Digest),
    Missing,
    Unreachable,
}

impl FixityVerifier {
    pub fn new(
        engine: DigestEngine,
        aggregator: Arc<StorageStateAggregator>,
        repository: Arc<dyn IngestRepository>,
    ) -> Self {
        Self {
            engine,
            aggregator,
            repository,
        }
    }

    pub fn engine(&self) -> &DigestEngine {
        &self.engine
    }

    /// Streaming digest of a file.
    pub fn digest(&self, path: &Path, algorithm: DigestAlgorithm) -> VerifyResult<Digest> {
        Ok(self.engine.digest(path, algorithm)?)
    }

    /// `true` iff the file at `path` digests to `expected`.
    pub fn verify_fixity(&self, path: &Path, expected: &Digest) -> VerifyResult<bool> {
        Ok(self.engine.verify(path, expected)?)
    }

    /// Check one file and report the full result.
    pub fn check_file(&self, path: &Path, expected: &Digest) -> VerifyResult<FixityResult> {
        let computed = self.digest(path, expected.algorithm())?;
        let result = FixityResult::compared(
            FixitySubject::File(path.to_path_buf()),
            expected.clone(),
            computed,
        );
        if !result.matched {
            warn!(path = %path.display(), expected = %expected, "fixity mismatch");
        }
        Ok(result)
    }

    /// Check every file listed in a submitted manifest under `root`.
    ///
    /// A listed file that is missing from the SIP is reported as a mismatch
    /// with no computed digest.
    pub fn check_manifest(
        &self,
        root: &Path,
        manifest: &SubmittedManifest,
    ) -> VerifyResult<Vec<FixityResult>> {
        let mut results = Vec::with_capacity(manifest.entries.len());
        for entry in &manifest.entries {
            let path: PathBuf = root.join(&entry.path);
            if !path.is_file() {
                warn!(root = %root.display(), file = %entry.path, "manifest lists missing file");
                results.push(FixityResult {
                    subject: FixitySubject::File(PathBuf::from(&entry.path)),
                    expected: entry.digest.clone(),
                    computed: None,
                    matched: false,
                    checked_at: Timestamp::now(),
                    divergent_nodes: Vec::new(),
                    unreachable_nodes: Vec::new(),
                });
                continue;
            }
            let mut result = self.check_file(&path, &entry.digest)?;
            result.subject = FixitySubject::File(PathBuf::from(&entry.path));
            results.push(result);
        }
        Ok(results)
    }

    /// Cross-check every replica of the latest stored AIP of `sip_id`.
    ///
    /// Fails with [`FixityError::MissingObject`] if the SIP has no stored
    /// version. Nodes that do not answer are listed as unreachable; nodes
    /// that answer without the package, or with another digest, are listed
    /// as divergent. Either makes the result unmatched.
    pub async fn aggregated_fixity(&self, sip_id: &SipId) -> VerifyResult<FixityResult> {
        let record = self
            .repository
            .latest_stored_version(sip_id)?
            .ok_or_else(|| FixityError::MissingObject(sip_id.clone()))?;
        let expected = record
            .digest
            .clone()
            .ok_or_else(|| FixityError::MissingObject(sip_id.clone()))?;
        let key = AipKey::new(sip_id.clone(), record.version);

        let node_ids = self.aggregator.node_ids();
        let mut asks = JoinSet::new();
        for (index, client) in self.aggregator.clients().enumerate() {
            let client = client.clone();
            let key = key.clone();
            let algorithm = expected.algorithm();
            asks.spawn(async move {
                let answer = match client.aip_digest(&key, algorithm).await {
                    Ok(Some(digest)) => ReplicaAnswer::Digest(digest),
                    Ok(None) => ReplicaAnswer::Missing,
                    Err(e) => {
                        warn!(node = %client.node_id(), error = %e, "replica digest unavailable");
                        ReplicaAnswer::Unreachable
                    }
                };
                (index, answer)
            });
        }

        let mut answers: Vec<Option<ReplicaAnswer>> = (0..node_ids.len()).map(|_| None).collect();
        while let Some(joined) = asks.join_next().await {
            if let Ok((index, answer)) = joined {
                answers[index] = Some(answer);
            }
        }

        let mut computed = None;
        let mut divergent_nodes: Vec<NodeId> = Vec::new();
        let mut unreachable_nodes: Vec<NodeId> = Vec::new();
        for (node, answer) in node_ids.into_iter().zip(answers) {
            match answer.unwrap_or(ReplicaAnswer::Unreachable) {
                ReplicaAnswer::Digest(digest) => {
                    if digest != expected {
                        divergent_nodes.push(node);
                    }
                    computed.get_or_insert(digest);
                }
                ReplicaAnswer::Missing => divergent_nodes.push(node),
                ReplicaAnswer::Unreachable => unreachable_nodes.push(node),
            }
        }

        let matched = computed.is_some() && divergent_nodes.is_empty() && unreachable_nodes.is_empty();
        if matched {
            debug!(sip = %sip_id, version = record.version, "replicas agree");
        } else {
            warn!(
                sip = %sip_id,
                version = record.version,
                divergent = ?divergent_nodes,
                unreachable = ?unreachable_nodes,
                "aggregated fixity mismatch"
            );
        }

        Ok(FixityResult {
            subject: FixitySubject::Sip(sip_id.clone()),
            expected,
            computed,
            matched,
            checked_at: Timestamp::now(),
            divergent_nodes,
            unreachable_nodes,
        })
    }
}

impl std::fmt::Debug for FixityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixityVerifier")
            .field("engine", &self.engine)
            .field("aggregator", &self.aggregator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_storage::{InMemoryStorageNode, StorageNode};
    use ark_store::{AipVersionAllocator, InMemoryRepository, SipRecord};
    use ark_types::BatchId;
    use std::time::Duration;

    const PACKAGE: &[u8] = b"encoded aip package";

    struct Fixture {
        nodes: Vec<Arc<InMemoryStorageNode>>,
        verifier: FixityVerifier,
        key: AipKey,
    }

    /// Three replicas holding version 1 of `sip`, recorded as stored.
    async fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryRepository::new());
        let sip = SipId::new("sip").unwrap();
        repo.save_sip(&SipRecord::new(sip.clone(), BatchId::new(), "/in/sip"))
            .unwrap();
        let engine = DigestEngine::new();
        let digest = engine.digest_bytes(PACKAGE, DigestAlgorithm::Sha256);
        let allocator = AipVersionAllocator::new(repo.clone());
        let record = allocator.allocate(&sip, Some(digest)).await.unwrap();

        let key = AipKey::new(sip.clone(), record.version);
        let nodes: Vec<Arc<InMemoryStorageNode>> = ["a", "b", "c"]
            .iter()
            .map(|n| Arc::new(InMemoryStorageNode::new(NodeId::new(*n).unwrap(), 1024)))
            .collect();
        for node in &nodes {
            node.put_aip(&key, PACKAGE).await.unwrap();
        }
        allocator.mark_stored(&sip, record.version).await.unwrap();

        let aggregator = StorageStateAggregator::with_nodes(
            nodes.iter().map(|n| n.clone() as Arc<dyn StorageNode>).collect(),
            Duration::from_millis(100),
        );
        Fixture {
            verifier: FixityVerifier::new(engine, Arc::new(aggregator), repo),
            nodes,
            key,
        }
    }

    fn sip() -> SipId {
        SipId::new("sip").unwrap()
    }

    #[tokio::test]
    async fn all_replicas_agree() {
        let f = fixture().await;
        let result = f.verifier.aggregated_fixity(&sip()).await.unwrap();
        assert!(result.matched);
        assert_eq!(result.computed.as_ref(), Some(&result.expected));
        assert!(result.divergent_nodes.is_empty());
    }

    #[tokio::test]
    async fn corrupted_replica_is_divergent_even_when_outvoted() {
        let f = fixture().await;
        assert!(f.nodes[1].corrupt(&f.key));
        let result = f.verifier.aggregated_fixity(&sip()).await.unwrap();
        assert!(!result.matched);
        assert_eq!(result.divergent_nodes, vec![NodeId::new("b").unwrap()]);
    }

    #[tokio::test]
    async fn unreachable_replica_makes_result_unmatched() {
        let f = fixture().await;
        f.nodes[2].set_reachable(false);
        let result = f.verifier.aggregated_fixity(&sip()).await.unwrap();
        assert!(!result.matched);
        assert!(result.divergent_nodes.is_empty());
        assert_eq!(result.unreachable_nodes, vec![NodeId::new("c").unwrap()]);
    }

    #[tokio::test]
    async fn replica_without_package_is_divergent() {
        let f = fixture().await;
        f.nodes[0].delete_aip(&f.key).await.unwrap();
        let result = f.verifier.aggregated_fixity(&sip()).await.unwrap();
        assert!(!result.matched);
        assert_eq!(result.divergent_nodes, vec![NodeId::new("a").unwrap()]);
    }

    #[tokio::test]
    async fn sip_without_stored_version_is_missing_object() {
        let f = fixture().await;
        let err = f
            .verifier
            .aggregated_fixity(&SipId::new("other").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FixityError::MissingObject(_)));
    }

    #[tokio::test]
    async fn verify_fixity_on_files() {
        let f = fixture().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        std::fs::write(&path, b"content").unwrap();
        let good = f.verifier.digest(&path, DigestAlgorithm::Blake3).unwrap();
        assert!(f.verifier.verify_fixity(&path, &good).unwrap());

        std::fs::write(&path, b"Content").unwrap();
        assert!(!f.verifier.verify_fixity(&path, &good).unwrap());
        assert!(!f.verifier.check_file(&path, &good).unwrap().matched);

        let err = f
            .verifier
            .verify_fixity(&dir.path().join("gone"), &good)
            .unwrap_err();
        assert!(matches!(err, FixityError::Io { .. }));
    }

    #[tokio::test]
    async fn manifest_check_reports_each_file() {
        let f = fixture().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/ok.txt"), b"ok").unwrap();
        std::fs::write(dir.path().join("data/bad.txt"), b"tampered").unwrap();

        let engine = DigestEngine::new();
        let ok = engine.digest_bytes(b"ok", DigestAlgorithm::Sha256);
        let bad = engine.digest_bytes(b"original", DigestAlgorithm::Sha256);
        let text = format!(
            "{}  data/ok.txt\n{}  data/bad.txt\n{}  data/gone.txt\n",
            ok.hex(),
            bad.hex(),
            ok.hex()
        );
        std::fs::write(dir.path().join("manifest-sha256.txt"), text).unwrap();

        let manifest = SubmittedManifest::discover(dir.path(), DigestAlgorithm::Sha256)
            .unwrap()
            .unwrap();
        let results = f.verifier.check_manifest(dir.path(), &manifest).unwrap();
        let matched: Vec<bool> = results.iter().map(|r| r.matched).collect();
        assert_eq!(matched, vec![true, false, false]);
        assert!(results[2].computed.is_none());
    }
}
