use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ark_crypto::{Digest, DigestAlgorithm};
use ark_types::{NodeId, SipId};

use crate::error::StorageResult;

/// Location of one AIP package version on a storage node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AipKey {
    pub sip_id: SipId,
    pub version: u32,
}

impl AipKey {
    pub fn new(sip_id: SipId, version: u32) -> Self {
        Self { sip_id, version }
    }

    /// Relative object path, `<sip>/v<version>.aip`.
    pub fn object_path(&self) -> String {
        format!("{}/v{}.aip", self.sip_id, self.version)
    }
}

impl fmt::Display for AipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.sip_id, self.version)
    }
}

/// Capacity and availability as reported by a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub capacity_bytes: u64,
    pub free_bytes: u64,
    pub running: bool,
}

/// Node-level query protocol for one storage backend.
///
/// Calls may block on the network or disk for arbitrarily long; callers go
/// through [`crate::StorageNodeClient`] which bounds every call with a
/// timeout.
#[async_trait]
pub trait StorageNode: Send + Sync {
    /// Stable identifier of this node.
    fn id(&self) -> &NodeId;

    /// Current capacity, free space and running flag.
    async fn status(&self) -> StorageResult<NodeStatus>;

    /// Write a package. The write is all-or-nothing: on error no partial
    /// object is left visible under `key`.
    async fn put_aip(&self, key: &AipKey, bytes: &[u8]) -> StorageResult<()>;

    /// Remove a package. Returns `true` if it existed.
    async fn delete_aip(&self, key: &AipKey) -> StorageResult<bool>;

    /// Digest of the stored package, computed on the node. `Ok(None)` if
    /// the node does not hold it.
    async fn aip_digest(
        &self,
        key: &AipKey,
        algorithm: DigestAlgorithm,
    ) -> StorageResult<Option<Digest>>;
}
