//! Ingest repository for Ark.
//!
//! Durable records for SIPs, batches and AIP versions live behind the
//! [`IngestRepository`] trait. The core treats the repository as an external
//! collaborator; [`InMemoryRepository`] is provided for tests and embedding.
//!
//! The [`AipVersionAllocator`] hands out AIP metadata versions per SIP. For a
//! fixed SIP the versions form the contiguous sequence `1, 2, 3, ...` no matter
//! how allocation requests interleave.
//!
//! # Design Rules
//!
//! 1. Version allocation for one SIP is serialized by a per-SIP lock.
//! 2. Allocation for different SIPs never contends on a shared lock.
//! 3. A version is only allocated for a registered SIP.
//! 4. Repository failures are propagated, never retried internally.

pub mod allocator;
pub mod error;
pub mod memory;
pub mod record;
pub mod traits;

pub use allocator::AipVersionAllocator;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryRepository;
pub use record::{AipVersionRecord, BatchRecord, SipRecord};
pub use traits::IngestRepository;
