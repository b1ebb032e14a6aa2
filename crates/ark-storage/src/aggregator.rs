use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use ark_types::NodeId;

use crate::client::StorageNodeClient;
use crate::error::{StorageError, StorageResult};
use crate::node::StorageNode;
use crate::state::{AggregatedStorageState, StorageNodeState};

/// Combines the answers of several storage nodes into one health view.
///
/// Polls run in parallel, each bounded by its client's timeout, so the
/// whole aggregation finishes within the slowest node timeout rather than
/// the sum of them. The latest state per node is cached for status queries.
pub struct StorageStateAggregator {
    clients: BTreeMap<NodeId, StorageNodeClient>,
    latest: RwLock<HashMap<NodeId, StorageNodeState>>,
}

impl StorageStateAggregator {
    pub fn new() -> Self {
        Self {
            clients: BTreeMap::new(),
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Build an aggregator over `nodes`, all sharing one poll timeout.
    pub fn with_nodes(nodes: Vec<Arc<dyn StorageNode>>, timeout: Duration) -> Self {
        let mut aggregator = Self::new();
        for node in nodes {
            aggregator.add_client(StorageNodeClient::new(node, timeout));
        }
        aggregator
    }

    /// Register a node client, replacing any client with the same id.
    pub fn add_client(&mut self, client: StorageNodeClient) {
        self.clients.insert(client.node_id().clone(), client);
    }

    /// Configured node ids in sorted order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.clients.keys().cloned().collect()
    }

    pub fn client(&self, node_id: &NodeId) -> StorageResult<&StorageNodeClient> {
        self.clients
            .get(node_id)
            .ok_or_else(|| StorageError::UnknownNode(node_id.clone()))
    }

    /// All configured clients in node id order.
    pub fn clients(&self) -> impl Iterator<Item = &StorageNodeClient> {
        self.clients.values()
    }

    /// Poll one node. An unknown node id yields the unreachable state.
    pub async fn poll_node(&self, node_id: &NodeId) -> StorageNodeState {
        let state = match self.clients.get(node_id) {
            Some(client) => client.poll().await,
            None => {
                warn!(node = %node_id, "polled unknown storage node");
                StorageNodeState::unreachable(node_id.clone())
            }
        };
        self.remember(std::slice::from_ref(&state));
        state
    }

    /// Poll `node_ids` in parallel and fold the results.
    pub async fn aggregate(&self, node_ids: &[NodeId]) -> AggregatedStorageState {
        let mut polls = JoinSet::new();
        for (index, node_id) in node_ids.iter().enumerate() {
            let node_id = node_id.clone();
            let client = self.clients.get(&node_id).cloned();
            polls.spawn(async move {
                let state = match client {
                    Some(client) => client.poll().await,
                    None => StorageNodeState::unreachable(node_id),
                };
                (index, state)
            });
        }

        let mut slots: Vec<Option<StorageNodeState>> = vec![None; node_ids.len()];
        while let Some(joined) = polls.join_next().await {
            match joined {
                Ok((index, state)) => slots[index] = Some(state),
                Err(e) => warn!(error = %e, "storage poll task failed"),
            }
        }
        let states: Vec<StorageNodeState> = slots
            .into_iter()
            .zip(node_ids)
            .map(|(slot, id)| slot.unwrap_or_else(|| StorageNodeState::unreachable(id.clone())))
            .collect();

        self.remember(&states);
        let aggregated = AggregatedStorageState::from_nodes(states);
        debug!(
            nodes = node_ids.len(),
            capacity = aggregated.capacity_bytes,
            free = aggregated.free_bytes,
            running = aggregated.running,
            unreachable = aggregated.unreachable.len(),
            "aggregated storage state"
        );
        aggregated
    }

    /// Aggregate over every configured node.
    pub async fn aggregate_all(&self) -> AggregatedStorageState {
        self.aggregate(&self.node_ids()).await
    }

    /// Most recent polled state per node, sorted by node id.
    pub fn latest(&self) -> Vec<StorageNodeState> {
        let latest = self.latest.read().expect("state cache poisoned");
        let mut states: Vec<StorageNodeState> = latest.values().cloned().collect();
        states.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        states
    }

    fn remember(&self, states: &[StorageNodeState]) {
        let mut latest = self.latest.write().expect("state cache poisoned");
        for state in states {
            latest.insert(state.node_id.clone(), state.clone());
        }
    }
}

impl Default for StorageStateAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StorageStateAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageStateAggregator")
            .field("nodes", &self.node_ids())
            .finish()
    }
}
