//! Storage node protocol and health aggregation for Ark.
//!
//! Every replica of an AIP lives on a storage node reached through the
//! [`StorageNode`] trait. A [`StorageNodeClient`] wraps one node and puts a
//! fixed timeout on every call; the [`StorageStateAggregator`] polls a set of
//! nodes in parallel and folds their answers into one
//! [`AggregatedStorageState`] used for admission decisions.
//!
//! An unreachable node is an expected operating condition: it degrades into
//! a synthetic `running = false` state with zero capacity rather than an
//! error.
//!
//! # Backends
//!
//! - [`FsStorageNode`] -- directory-backed node with a declared capacity
//! - [`InMemoryStorageNode`] -- map-backed node with fault injection for tests

pub mod aggregator;
pub mod client;
pub mod error;
pub mod fs;
pub mod memory;
pub mod node;
pub mod state;

pub use aggregator::StorageStateAggregator;
pub use client::StorageNodeClient;
pub use error::{StorageError, StorageResult};
pub use fs::FsStorageNode;
pub use memory::InMemoryStorageNode;
pub use node::{AipKey, NodeStatus, StorageNode};
pub use state::{AggregatedStorageState, StorageNodeState};
