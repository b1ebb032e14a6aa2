use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ark_crypto::DigestAlgorithm;
use ark_storage::{FsStorageNode, InMemoryStorageNode, StorageNode, StorageStateAggregator};
use ark_types::NodeId;

use crate::error::{BatchError, BatchResult};

/// Backend type of a configured storage node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Fs,
    Memory,
}

/// One `[[nodes]]` entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Root directory; required for `fs` nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    pub capacity_bytes: u64,
}

/// Configuration for the ingest coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum number of SIP units processed concurrently per batch.
    pub workers: usize,
    /// Aggregated free space that must be exceeded before a batch starts.
    pub min_free_bytes: u64,
    /// Timeout applied to every storage node call.
    pub node_timeout_ms: u64,
    pub digest_algorithm: DigestAlgorithm,
    /// Signature database replacing the built-in one.
    pub signature_db: Option<PathBuf>,
    pub reject_unknown_formats: bool,
    /// Fail a unit whose content disagrees with its submitted manifest.
    pub fail_on_submitted_mismatch: bool,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
    /// Largest SIP content, in bytes, a unit may package. Packages are
    /// built in memory, so this bounds per-worker memory at about twice
    /// the limit. `None` accepts any size.
    pub max_package_bytes: Option<u64>,
    pub nodes: Vec<NodeConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            min_free_bytes: 0,
            node_timeout_ms: 5_000,
            digest_algorithm: DigestAlgorithm::Sha256,
            signature_db: None,
            reject_unknown_formats: false,
            fail_on_submitted_mismatch: false,
            event_capacity: 256,
            max_package_bytes: None,
            nodes: vec![NodeConfig {
                id: NodeId::new("local").expect("static node id is valid"),
                kind: NodeKind::Memory,
                root: None,
                capacity_bytes: 1 << 30,
            }],
        }
    }
}

impl IngestConfig {
    pub fn from_toml_str(text: &str) -> BatchResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| BatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> BatchResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| BatchError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    /// Reject configurations the coordinator cannot run with.
    pub fn validate(&self) -> BatchResult<()> {
        if self.workers == 0 {
            return Err(BatchError::Config("workers must be at least 1".into()));
        }
        if self.node_timeout_ms == 0 {
            return Err(BatchError::Config("node_timeout_ms must be positive".into()));
        }
        if self.max_package_bytes == Some(0) {
            return Err(BatchError::Config("max_package_bytes must be positive".into()));
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(&node.id) {
                return Err(BatchError::Config(format!("duplicate node id {}", node.id)));
            }
            if node.kind == NodeKind::Fs && node.root.is_none() {
                return Err(BatchError::Config(format!("fs node {} needs a root", node.id)));
            }
        }
        Ok(())
    }

    /// Open every configured storage node.
    pub fn build_nodes(&self) -> BatchResult<Vec<Arc<dyn StorageNode>>> {
        self.nodes
            .iter()
            .map(|node| -> BatchResult<Arc<dyn StorageNode>> {
                match (node.kind, &node.root) {
                    (NodeKind::Fs, Some(root)) => Ok(Arc::new(FsStorageNode::open(
                        node.id.clone(),
                        root,
                        node.capacity_bytes,
                    )?)),
                    (NodeKind::Fs, None) => Err(BatchError::Config(format!(
                        "fs node {} needs a root",
                        node.id
                    ))),
                    (NodeKind::Memory, _) => Ok(Arc::new(InMemoryStorageNode::new(
                        node.id.clone(),
                        node.capacity_bytes,
                    ))),
                }
            })
            .collect()
    }

    pub fn build_aggregator(&self) -> BatchResult<StorageStateAggregator> {
        Ok(StorageStateAggregator::with_nodes(
            self.build_nodes()?,
            self.node_timeout(),
        ))
    }
}
