//! Batch ingest coordination for Ark.
//!
//! A batch is an ordered set of SIPs (submission packages). The
//! [`BatchCoordinator`] turns each SIP into a [`SipUnit`] and drives it
//! through five stages:
//!
//! 1. IDENTIFY -- characterize every file with the format identifier
//! 2. VALIDATE -- run the configured [`SipValidator`]
//! 3. FIXITY -- digest every file and check any submitted manifest
//! 4. VERSION -- allocate the next AIP version and assemble the package
//! 5. STORE -- write the package to every storage node, or to none
//!
//! Units run concurrently up to the configured worker count. A unit
//! failure never touches its siblings. Batches can be suspended, resumed
//! and canceled; all three act at stage boundaries.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod package;
mod pipeline;
pub mod unit;
pub mod validator;

pub use config::{IngestConfig, NodeConfig, NodeKind};
pub use coordinator::{BatchCoordinator, BatchSnapshot, Collaborators, UnitCounts};
pub use error::{BatchError, BatchResult};
pub use event::BatchEvent;
pub use package::{AipFile, AipPackage};
pub use unit::{SipUnit, Stage, StageOutputs, UnitFailure, UnitState};
pub use validator::{SipContent, SipValidator, StructureValidator, Verdict};
