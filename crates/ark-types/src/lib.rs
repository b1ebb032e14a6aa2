//! Foundation types for Ark.
//!
//! This crate provides the identifier and timestamp value types shared by
//! every other Ark crate. Records elsewhere in the workspace are plain data
//! composed from these types.
//!
//! # Key Types
//!
//! - [`SipId`] -- identifier of a Submission Information Package
//! - [`BatchId`] -- UUID v7 identifier of an ingest batch
//! - [`NodeId`] -- identifier of a storage node
//! - [`Timestamp`] -- wall-clock milliseconds since the UNIX epoch
//! - [`BatchState`] -- lifecycle state of an ingest batch

pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod temporal;

pub use error::TypeError;
pub use ids::{BatchId, NodeId, SipId};
pub use lifecycle::BatchState;
pub use temporal::Timestamp;
