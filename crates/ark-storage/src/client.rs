use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use ark_crypto::{Digest, DigestAlgorithm};
use ark_types::NodeId;

use crate::error::{StorageError, StorageResult};
use crate::node::{AipKey, StorageNode};
use crate::state::StorageNodeState;

/// Bounded-timeout client for one storage node.
///
/// Every call is wrapped in `tokio::time::timeout`, so a hung node can never
/// stall the caller past `timeout`. Cloning is cheap.
#[derive(Clone)]
pub struct StorageNodeClient {
    node: Arc<dyn StorageNode>,
    timeout: Duration,
}

impl StorageNodeClient {
    pub fn new(node: Arc<dyn StorageNode>, timeout: Duration) -> Self {
        Self { node, timeout }
    }

    pub fn node_id(&self) -> &NodeId {
        self.node.id()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(&self, call: impl Future<Output = StorageResult<T>>) -> StorageResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                node: self.node_id().clone(),
                after: self.timeout,
            }),
        }
    }

    /// Poll capacity and availability.
    ///
    /// Never fails: a timeout or connection failure yields the synthetic
    /// unreachable state.
    pub async fn poll(&self) -> StorageNodeState {
        match self.bounded(self.node.status()).await {
            Ok(status) => StorageNodeState::reported(self.node_id().clone(), status),
            Err(e) => {
                warn!(node = %self.node_id(), error = %e, "storage node unreachable");
                StorageNodeState::unreachable(self.node_id().clone())
            }
        }
    }

    pub async fn put_aip(&self, key: &AipKey, bytes: &[u8]) -> StorageResult<()> {
        self.bounded(self.node.put_aip(key, bytes)).await
    }

    pub async fn delete_aip(&self, key: &AipKey) -> StorageResult<bool> {
        self.bounded(self.node.delete_aip(key)).await
    }

    pub async fn aip_digest(
        &self,
        key: &AipKey,
        algorithm: DigestAlgorithm,
    ) -> StorageResult<Option<Digest>> {
        self.bounded(self.node.aip_digest(key, algorithm)).await
    }
}

impl std::fmt::Debug for StorageNodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageNodeClient")
            .field("node", self.node_id())
            .field("timeout", &self.timeout)
            .finish()
    }
}
