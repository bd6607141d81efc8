//! Phase ledger: per-build record of pipeline stage progress.
//!
//! Each pipeline stage carries a status and the time that status was
//! recorded. Timestamps never go backwards: every write is clamped to the
//! latest timestamp already present in the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BuildId, LedgerId, OwnerId, ProjectId};

/// A pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Parameters,
    Application,
    Diagnostics,
    Network,
    Nvm,
    Ids,
    Compile,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Start,
        Phase::Parameters,
        Phase::Application,
        Phase::Diagnostics,
        Phase::Network,
        Phase::Nvm,
        Phase::Ids,
        Phase::Compile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::Parameters => "parameters",
            Phase::Application => "application",
            Phase::Diagnostics => "diagnostics",
            Phase::Network => "network",
            Phase::Nvm => "nvm",
            Phase::Ids => "ids",
            Phase::Compile => "compile",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown phase: {:?}", s))
    }
}

/// Status of a single stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

/// Status and timestamp of one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntry {
    pub status: StageStatus,
    pub at: Option<DateTime<Utc>>,
}

impl StageEntry {
    fn set(&mut self, status: StageStatus, at: DateTime<Utc>) {
        self.status = status;
        self.at = Some(at);
    }
}

/// All stage entries of a ledger, plus the terminal `finished` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stages {
    pub start: StageEntry,
    pub parameters: StageEntry,
    pub application: StageEntry,
    pub diagnostics: StageEntry,
    pub network: StageEntry,
    pub nvm: StageEntry,
    pub ids: StageEntry,
    pub compile: StageEntry,
    pub finished: StageEntry,
}

impl Stages {
    pub fn entry(&self, phase: Phase) -> &StageEntry {
        match phase {
            Phase::Start => &self.start,
            Phase::Parameters => &self.parameters,
            Phase::Application => &self.application,
            Phase::Diagnostics => &self.diagnostics,
            Phase::Network => &self.network,
            Phase::Nvm => &self.nvm,
            Phase::Ids => &self.ids,
            Phase::Compile => &self.compile,
        }
    }

    pub fn entry_mut(&mut self, phase: Phase) -> &mut StageEntry {
        match phase {
            Phase::Start => &mut self.start,
            Phase::Parameters => &mut self.parameters,
            Phase::Application => &mut self.application,
            Phase::Diagnostics => &mut self.diagnostics,
            Phase::Network => &mut self.network,
            Phase::Nvm => &mut self.nvm,
            Phase::Ids => &mut self.ids,
            Phase::Compile => &mut self.compile,
        }
    }

    /// Stages with the start stage marked running at `at`.
    pub fn started(at: DateTime<Utc>) -> Self {
        let mut stages = Self::default();
        stages.start.set(StageStatus::Running, at);
        stages
    }

    fn latest(&self) -> Option<DateTime<Utc>> {
        Phase::ALL
            .iter()
            .filter_map(|p| self.entry(*p).at)
            .chain(self.finished.at)
            .max()
    }
}

/// How a ledger was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    Finished,
    Failed,
    Stopped,
}

/// Per-build progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseLedger {
    pub id: LedgerId,
    pub owner_id: OwnerId,
    pub project_id: ProjectId,
    pub build_id: BuildId,
    pub stages: Stages,
    pub in_queue: bool,
    pub download: bool,
}

impl PhaseLedger {
    /// Latest timestamp recorded in any stage.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.stages.latest()
    }

    /// The stage currently running, if any.
    pub fn open_phase(&self) -> Option<Phase> {
        Phase::ALL
            .into_iter()
            .rev()
            .find(|p| self.stages.entry(*p).status == StageStatus::Running)
    }

    pub fn is_closed(&self) -> bool {
        self.stages.finished.at.is_some()
    }

    fn clamp(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_activity() {
            Some(latest) if latest > at => latest,
            _ => at,
        }
    }

    /// Reset every stage for a rebuild and mark the start stage running.
    pub fn restart(&mut self, at: DateTime<Utc>) {
        let at = self.clamp(at);
        self.stages = Stages::started(at);
        self.in_queue = false;
        self.download = false;
    }

    /// Enter `phase`, closing the currently open stage as succeeded.
    pub fn enter(&mut self, phase: Phase, at: DateTime<Utc>) {
        let at = self.clamp(at);
        self.in_queue = false;
        if let Some(open) = self.open_phase() {
            if open == phase {
                return;
            }
            self.stages.entry_mut(open).set(StageStatus::Succeeded, at);
        }
        self.stages.entry_mut(phase).set(StageStatus::Running, at);
    }

    /// Mark `phase` as succeeded without entering another stage.
    pub fn complete(&mut self, phase: Phase, at: DateTime<Utc>) {
        let at = self.clamp(at);
        self.stages.entry_mut(phase).set(StageStatus::Succeeded, at);
    }

    /// Record that the CI engine is holding the build in its queue.
    pub fn mark_queued(&mut self, at: DateTime<Utc>) {
        let at = self.clamp(at);
        self.in_queue = true;
        if self.stages.start.status == StageStatus::Pending {
            self.stages.start.at = Some(at);
        }
    }

    /// Close the ledger, settling the open stage according to `closure`.
    pub fn close(&mut self, closure: Closure, at: DateTime<Utc>) {
        let at = self.clamp(at);
        let (stage_status, finished_status) = match closure {
            Closure::Finished => (StageStatus::Succeeded, StageStatus::Succeeded),
            Closure::Failed => (StageStatus::Failed, StageStatus::Failed),
            Closure::Stopped => (StageStatus::Stopped, StageStatus::Stopped),
        };
        if let Some(open) = self.open_phase() {
            self.stages.entry_mut(open).set(stage_status, at);
        }
        self.stages.finished.set(finished_status, at);
        self.in_queue = false;
    }
}
