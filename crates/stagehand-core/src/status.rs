//! Build status state machine.
//!
//! A build request moves through a fixed vocabulary of phases. The
//! transition table lives in [`BuildStatus::can_transition_to`]; every
//! status mutation in the system goes through [`BuildStatus::transition`].

use serde::{Deserialize, Serialize};

use crate::ledger::Phase;
use crate::{Error, Result};

/// Status of a build request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildStatus {
    /// Bundle uploaded, never invoked.
    #[serde(rename = "Uploaded")]
    Uploaded,
    /// Held in the CI engine's queue.
    #[serde(rename = "In Queue")]
    InQueue,
    #[serde(rename = "Starting")]
    Starting,
    #[serde(rename = "Generating Parameters")]
    GeneratingParameters,
    #[serde(rename = "Generating Application")]
    GeneratingApplication,
    #[serde(rename = "Generating Diagnostics")]
    GeneratingDiagnostics,
    #[serde(rename = "Generating Network")]
    GeneratingNetwork,
    #[serde(rename = "Generating NVM")]
    GeneratingNvm,
    #[serde(rename = "Updating IDs")]
    UpdatingIds,
    #[serde(rename = "Compiling")]
    Compiling,
    #[serde(rename = "Finished")]
    Finished,
    #[serde(rename = "Failed")]
    Failed,
    #[serde(rename = "Stopped")]
    Stopped,
}

impl BuildStatus {
    pub const ALL: [BuildStatus; 13] = [
        BuildStatus::Uploaded,
        BuildStatus::InQueue,
        BuildStatus::Starting,
        BuildStatus::GeneratingParameters,
        BuildStatus::GeneratingApplication,
        BuildStatus::GeneratingDiagnostics,
        BuildStatus::GeneratingNetwork,
        BuildStatus::GeneratingNvm,
        BuildStatus::UpdatingIds,
        BuildStatus::Compiling,
        BuildStatus::Finished,
        BuildStatus::Failed,
        BuildStatus::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Uploaded => "Uploaded",
            BuildStatus::InQueue => "In Queue",
            BuildStatus::Starting => "Starting",
            BuildStatus::GeneratingParameters => "Generating Parameters",
            BuildStatus::GeneratingApplication => "Generating Application",
            BuildStatus::GeneratingDiagnostics => "Generating Diagnostics",
            BuildStatus::GeneratingNetwork => "Generating Network",
            BuildStatus::GeneratingNvm => "Generating NVM",
            BuildStatus::UpdatingIds => "Updating IDs",
            BuildStatus::Compiling => "Compiling",
            BuildStatus::Finished => "Finished",
            BuildStatus::Failed => "Failed",
            BuildStatus::Stopped => "Stopped",
        }
    }

    /// The pipeline phase this status represents, if it is a running phase.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            BuildStatus::Starting => Some(Phase::Start),
            BuildStatus::GeneratingParameters => Some(Phase::Parameters),
            BuildStatus::GeneratingApplication => Some(Phase::Application),
            BuildStatus::GeneratingDiagnostics => Some(Phase::Diagnostics),
            BuildStatus::GeneratingNetwork => Some(Phase::Network),
            BuildStatus::GeneratingNvm => Some(Phase::Nvm),
            BuildStatus::UpdatingIds => Some(Phase::Ids),
            BuildStatus::Compiling => Some(Phase::Compile),
            _ => None,
        }
    }

    /// Queued or running.
    pub fn is_in_flight(&self) -> bool {
        *self == BuildStatus::InQueue || self.is_running()
    }

    /// Executing a pipeline phase; excludes `InQueue`.
    pub fn is_running(&self) -> bool {
        self.phase().is_some()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Finished | BuildStatus::Failed | BuildStatus::Stopped
        )
    }

    /// Statuses that count as running, for store queries.
    pub fn running() -> impl Iterator<Item = BuildStatus> {
        Self::ALL.into_iter().filter(|s| s.is_running())
    }

    /// Statuses that count as in flight, for store queries.
    pub fn in_flight() -> impl Iterator<Item = BuildStatus> {
        Self::ALL.into_iter().filter(|s| s.is_in_flight())
    }

    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        use BuildStatus::*;

        match (*self, next) {
            (Uploaded, Starting | InQueue) => true,
            (Starting, InQueue) => true,
            (InQueue, Failed | Stopped) => true,
            (InQueue, n) => n.is_running(),
            (from, to) if from.is_running() => match (from.phase(), to.phase()) {
                (Some(a), Some(b)) => b > a,
                (_, None) => matches!(to, Finished | Failed | Stopped),
                _ => false,
            },
            (Finished | Failed | Stopped, Starting) => true,
            _ => false,
        }
    }

    /// Validate a transition, returning the next status.
    pub fn transition(&self, next: BuildStatus) -> Result<BuildStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidOperation(format!(
                "invalid status transition: {} -> {}",
                self, next
            )))
        }
    }
}

impl From<Phase> for BuildStatus {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Start => BuildStatus::Starting,
            Phase::Parameters => BuildStatus::GeneratingParameters,
            Phase::Application => BuildStatus::GeneratingApplication,
            Phase::Diagnostics => BuildStatus::GeneratingDiagnostics,
            Phase::Network => BuildStatus::GeneratingNetwork,
            Phase::Nvm => BuildStatus::GeneratingNvm,
            Phase::Ids => BuildStatus::UpdatingIds,
            Phase::Compile => BuildStatus::Compiling,
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored status string is not part of the vocabulary.
#[derive(Debug, thiserror::Error)]
#[error("unknown build status: {0:?}")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for BuildStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl TryFrom<String> for BuildStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}
