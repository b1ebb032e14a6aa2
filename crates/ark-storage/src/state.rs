use serde::{Deserialize, Serialize};

use ark_types::{NodeId, Timestamp};

use crate::node::NodeStatus;

/// Latest observed state of one storage node.
///
/// Ephemeral: recomputed on every poll.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNodeState {
    pub node_id: NodeId,
    pub capacity_bytes: u64,
    pub free_bytes: u64,
    pub running: bool,
    pub last_checked_at: Timestamp,
    /// The node timed out or refused the connection. Always implies
    /// `running == false` and zero capacity.
    pub unreachable: bool,
}

impl StorageNodeState {
    /// State built from a successful status answer.
    pub fn reported(node_id: NodeId, status: NodeStatus) -> Self {
        Self {
            node_id,
            capacity_bytes: status.capacity_bytes,
            free_bytes: status.free_bytes.min(status.capacity_bytes),
            running: status.running,
            last_checked_at: Timestamp::now(),
            unreachable: false,
        }
    }

    /// Synthetic state for a node that could not be reached.
    pub fn unreachable(node_id: NodeId) -> Self {
        Self {
            node_id,
            capacity_bytes: 0,
            free_bytes: 0,
            running: false,
            last_checked_at: Timestamp::now(),
            unreachable: true,
        }
    }
}

/// Health view derived from a set of node states. Never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedStorageState {
    /// Sum of reachable nodes' capacity.
    pub capacity_bytes: u64,
    /// Sum of reachable nodes' free space.
    pub free_bytes: u64,
    /// `true` only if every node is reachable and reports running.
    pub running: bool,
    /// Per-node states in the order the nodes were requested.
    pub nodes: Vec<StorageNodeState>,
    /// Nodes that could not be reached, for alerting.
    pub unreachable: Vec<NodeId>,
    pub checked_at: Timestamp,
}

impl AggregatedStorageState {
    /// Fold node states into the aggregate.
    ///
    /// An empty node set is not running: there is nowhere to store.
    pub fn from_nodes(nodes: Vec<StorageNodeState>) -> Self {
        let reachable = || nodes.iter().filter(|n| !n.unreachable);
        let capacity_bytes: u64 = reachable().map(|n| n.capacity_bytes).sum();
        let free_bytes: u64 = reachable().map(|n| n.free_bytes).sum();
        let running = !nodes.is_empty() && nodes.iter().all(|n| n.running && !n.unreachable);
        let unreachable = nodes
            .iter()
            .filter(|n| n.unreachable)
            .map(|n| n.node_id.clone())
            .collect();
        Self {
            capacity_bytes,
            free_bytes,
            running,
            nodes,
            unreachable,
            checked_at: Timestamp::now(),
        }
    }

    /// Admission gate: running, and strictly more than `min_free_bytes` free.
    pub fn admits(&self, min_free_bytes: u64) -> bool {
        self.running && self.free_bytes > min_free_bytes
    }

    /// Smallest free space on any node. Every node receives a full replica,
    /// so this bounds the largest package that can be stored.
    pub fn min_node_free(&self) -> u64 {
        self.nodes.iter().map(|n| n.free_bytes).min().unwrap_or(0)
    }
}
