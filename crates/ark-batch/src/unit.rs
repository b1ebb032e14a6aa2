use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ark_crypto::Digest;
use ark_fixity::FixityResult;
use ark_format::DetectedFormat;
use ark_types::{NodeId, SipId};

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One step of the per-SIP pipeline. The order is fixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Identify,
    Validate,
    Fixity,
    Version,
    Store,
}

impl Stage {
    pub const ORDER: [Stage; 5] = [
        Self::Identify,
        Self::Validate,
        Self::Fixity,
        Self::Version,
        Self::Store,
    ];

    /// The stage after this one, or `None` after `Store`.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::Identify => Some(Self::Validate),
            Self::Validate => Some(Self::Fixity),
            Self::Fixity => Some(Self::Version),
            Self::Version => Some(Self::Store),
            Self::Store => None,
        }
    }

    /// Unit state while this stage runs.
    pub fn running_state(&self) -> UnitState {
        match self {
            Self::Identify => UnitState::Identifying,
            Self::Validate => UnitState::Validating,
            Self::Fixity => UnitState::CheckingFixity,
            Self::Version => UnitState::Versioning,
            Self::Store => UnitState::Storing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identify => "IDENTIFY",
            Self::Validate => "VALIDATE",
            Self::Fixity => "FIXITY",
            Self::Version => "VERSION",
            Self::Store => "STORE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// UnitState
// ---------------------------------------------------------------------------

/// Processing state of one SIP unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitState {
    Pending,
    Identifying,
    Validating,
    CheckingFixity,
    Versioning,
    Storing,
    Done,
    Failed,
}

impl UnitState {
    /// `Done` and `Failed` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// A stage is executing for this unit.
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != Self::Pending
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Identifying => "IDENTIFYING",
            Self::Validating => "VALIDATING",
            Self::CheckingFixity => "CHECKING_FIXITY",
            Self::Versioning => "VERSIONING",
            Self::Storing => "STORING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SipUnit
// ---------------------------------------------------------------------------

/// Why a unit failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub stage: Stage,
    pub message: String,
}

/// Typed results of the stages a unit has completed.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StageOutputs {
    /// IDENTIFY: relative path to detected format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formats: Option<BTreeMap<String, DetectedFormat>>,
    /// FIXITY: relative path to content digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digests: Option<BTreeMap<String, Digest>>,
    /// FIXITY: checks against the submitted manifest, if one was shipped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub submitted_fixity: Vec<FixityResult>,
    /// VERSION: allocated AIP version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_digest: Option<Digest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_bytes: Option<u64>,
    /// STORE: nodes holding a replica.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stored_on: Vec<NodeId>,
    /// Cross-check of every replica after STORE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_check: Option<FixityResult>,
    /// Encoded package carried from VERSION to STORE.
    #[serde(skip)]
    pub(crate) encoded: Option<Arc<Vec<u8>>>,
}

/// One SIP's unit of work inside a batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SipUnit {
    pub sip_id: SipId,
    pub source: PathBuf,
    pub state: UnitState,
    /// Checkpoint: the stage to run next. `None` once every stage is done.
    pub next_stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<UnitFailure>,
    #[serde(default)]
    pub outputs: StageOutputs,
}

impl SipUnit {
    pub fn new(sip_id: SipId, source: impl Into<PathBuf>) -> Self {
        Self {
            sip_id,
            source: source.into(),
            state: UnitState::Pending,
            next_stage: Some(Stage::Identify),
            failure: None,
            outputs: StageOutputs::default(),
        }
    }

    /// Pending, but already past at least one stage.
    pub fn is_parked(&self) -> bool {
        self.state == UnitState::Pending && self.next_stage != Some(Stage::Identify)
    }

    pub(crate) fn fail(&mut self, stage: Stage, message: impl Into<String>) {
        self.state = UnitState::Failed;
        self.failure = Some(UnitFailure {
            stage,
            message: message.into(),
        });
    }
}
