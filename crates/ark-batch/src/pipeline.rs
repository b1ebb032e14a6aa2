use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use ark_crypto::{DigestAlgorithm, DigestEngine};
use ark_fixity::{FixityResult, FixityVerifier, SubmittedManifest};
use ark_format::FormatIdentifier;
use ark_storage::{AipKey, StorageNodeClient, StorageStateAggregator};
use ark_store::AipVersionAllocator;
use ark_types::SipId;

use crate::error::{BatchError, BatchResult};
use crate::package::{content_path, content_size, AipPackage};
use crate::unit::{Stage, StageOutputs};
use crate::validator::{SipContent, SipValidator, Verdict};

/// Inputs and accumulated outputs of one unit while a stage runs.
#[derive(Clone, Debug)]
pub(crate) struct UnitWork {
    pub sip_id: SipId,
    pub source: PathBuf,
    pub outputs: StageOutputs,
}

/// Stage implementations of the per-SIP pipeline.
///
/// Every stage reads what earlier stages left in [`StageOutputs`] and adds
/// its own results. Stages that touch the local filesystem run on the
/// blocking pool.
pub(crate) struct Pipeline {
    pub identifier: FormatIdentifier,
    pub validator: Arc<dyn SipValidator>,
    pub verifier: Arc<FixityVerifier>,
    pub allocator: AipVersionAllocator,
    pub aggregator: Arc<StorageStateAggregator>,
    pub engine: DigestEngine,
    pub algorithm: DigestAlgorithm,
    pub fail_on_submitted_mismatch: bool,
    pub max_package_bytes: Option<u64>,
}

impl Pipeline {
    /// Run one stage. `canceled` is polled between storage writes so a
    /// cancellation can roll back a partially written package.
    pub async fn run(
        &self,
        stage: Stage,
        work: &mut UnitWork,
        canceled: &(dyn Fn() -> bool + Sync),
    ) -> BatchResult<()> {
        debug!(sip = %work.sip_id, stage = %stage, "running stage");
        match stage {
            Stage::Identify => self.identify(work).await,
            Stage::Validate => self.validate(work).await,
            Stage::Fixity => self.fixity(work).await,
            Stage::Version => self.version(work).await,
            Stage::Store => self.store(work, canceled).await,
        }
    }

    async fn identify(&self, work: &mut UnitWork) -> BatchResult<()> {
        let identifier = self.identifier.clone();
        let source = work.source.clone();
        let formats = blocking(move || Ok(identifier.analyze(&source)?)).await?;
        work.outputs.formats = Some(formats);
        Ok(())
    }

    async fn validate(&self, work: &mut UnitWork) -> BatchResult<()> {
        let formats = work
            .outputs
            .formats
            .as_ref()
            .ok_or_else(|| missing(Stage::Identify))?;
        let verdict = self
            .validator
            .validate(SipContent {
                sip_id: &work.sip_id,
                source: &work.source,
                formats,
            })
            .await;
        match verdict {
            Verdict::Accept => Ok(()),
            Verdict::Reject { reason } => {
                debug!(sip = %work.sip_id, validator = self.validator.name(), %reason, "rejected");
                Err(BatchError::Validation(reason))
            }
        }
    }

    async fn fixity(&self, work: &mut UnitWork) -> BatchResult<()> {
        let files: Vec<String> = work
            .outputs
            .formats
            .as_ref()
            .ok_or_else(|| missing(Stage::Identify))?
            .keys()
            .cloned()
            .collect();
        let verifier = Arc::clone(&self.verifier);
        let source = work.source.clone();
        let algorithm = self.algorithm;

        let (digests, submitted) = blocking(move || {
            let mut digests = BTreeMap::new();
            for relative in files {
                let digest = verifier.digest(&content_path(&source, &relative), algorithm)?;
                digests.insert(relative, digest);
            }
            let submitted = match SubmittedManifest::discover(&source, algorithm)? {
                Some(manifest) => verifier.check_manifest(&source, &manifest)?,
                None => Vec::new(),
            };
            Ok((digests, submitted))
        })
        .await?;

        let mismatched = submitted.iter().filter(|r| !r.matched).count();
        work.outputs.digests = Some(digests);
        work.outputs.submitted_fixity = submitted;
        if mismatched > 0 && self.fail_on_submitted_mismatch {
            return Err(BatchError::Validation(format!(
                "{mismatched} file(s) do not match the submitted manifest"
            )));
        }
        Ok(())
    }

    async fn version(&self, work: &mut UnitWork) -> BatchResult<()> {
        let formats = work
            .outputs
            .formats
            .clone()
            .ok_or_else(|| missing(Stage::Identify))?;
        // Checked before a version number is claimed.
        if let Some(limit) = self.max_package_bytes {
            let source = work.source.clone();
            let listed = formats.clone();
            let size = blocking(move || content_size(&source, &listed)).await?;
            if size > limit {
                return Err(BatchError::Validation(format!(
                    "SIP content of {size} bytes exceeds max_package_bytes {limit}"
                )));
            }
        }
        let version = self.allocator.next_version(&work.sip_id).await?;

        let sip_id = work.sip_id.clone();
        let source = work.source.clone();
        let digests = work
            .outputs
            .digests
            .clone()
            .ok_or_else(|| missing(Stage::Fixity))?;
        let encoded = blocking(move || {
            AipPackage::assemble(sip_id, version, &source, &formats, &digests)?.encode()
        })
        .await?;

        let digest = self.engine.digest_bytes(&encoded, self.algorithm);
        self.allocator
            .record_digest(&work.sip_id, version, digest.clone())
            .await?;
        debug!(sip = %work.sip_id, version, digest = %digest.short_hex(), "package built");

        work.outputs.version = Some(version);
        work.outputs.package_digest = Some(digest);
        work.outputs.package_bytes = Some(encoded.len() as u64);
        work.outputs.encoded = Some(Arc::new(encoded));
        Ok(())
    }

    async fn store(
        &self,
        work: &mut UnitWork,
        canceled: &(dyn Fn() -> bool + Sync),
    ) -> BatchResult<()> {
        let version = work.outputs.version.ok_or_else(|| missing(Stage::Version))?;
        let encoded = work
            .outputs
            .encoded
            .clone()
            .ok_or_else(|| missing(Stage::Version))?;
        let needed = encoded.len() as u64;

        // Every node receives a full replica.
        let storage = self.aggregator.aggregate_all().await;
        let free = storage.min_node_free();
        if !storage.running || free < needed {
            return Err(BatchError::InsufficientStorage {
                free_bytes: free,
                required_bytes: needed,
                running: storage.running,
            });
        }

        let key = AipKey::new(work.sip_id.clone(), version);
        let mut written: Vec<&StorageNodeClient> = Vec::new();
        for client in self.aggregator.clients() {
            if canceled() {
                self.roll_back(&key, &written).await;
                return Err(BatchError::Canceled);
            }
            if let Err(e) = client.put_aip(&key, &encoded).await {
                warn!(node = %client.node_id(), key = %key, error = %e, "replica write failed");
                written.push(client);
                self.roll_back(&key, &written).await;
                return Err(e.into());
            }
            written.push(client);
        }

        if let Err(e) = self.allocator.mark_stored(&work.sip_id, version).await {
            self.roll_back(&key, &written).await;
            return Err(e.into());
        }
        work.outputs.stored_on = written.iter().map(|c| c.node_id().clone()).collect();
        work.outputs.encoded = None;
        Ok(())
    }

    /// Remove a package from every node it may have reached.
    async fn roll_back(&self, key: &AipKey, written: &[&StorageNodeClient]) {
        for client in written {
            match client.delete_aip(key).await {
                Ok(_) => debug!(node = %client.node_id(), key = %key, "rolled back replica"),
                Err(e) => {
                    warn!(node = %client.node_id(), key = %key, error = %e, "rollback failed")
                }
            }
        }
    }

    /// Cross-check the replicas of a freshly stored package.
    pub async fn replica_check(&self, sip_id: &SipId) -> Option<FixityResult> {
        match self.verifier.aggregated_fixity(sip_id).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(sip = %sip_id, error = %e, "replica check failed");
                None
            }
        }
    }
}

fn missing(stage: Stage) -> BatchError {
    BatchError::Validation(format!("output of {stage} is missing"))
}

async fn blocking<T, F>(f: F) -> BatchResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> BatchResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BatchError::Task(e.to_string()))?
}
