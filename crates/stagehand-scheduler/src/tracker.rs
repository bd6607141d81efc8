//! Build status tracking.
//!
//! [`BuildTracker`] is the only component that writes a build's status or
//! its phase ledger. The orchestrator, the CI callbacks and the watchdog all
//! go through it, so every change is checked against the transition table,
//! applied with a conditional write and broadcast exactly once.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use stagehand_core::artifact::{ArtifactRecord, BuildOutputs, FileVerify};
use stagehand_core::build::{BuildRequest, NewBuild};
use stagehand_core::ledger::{Closure, Phase, PhaseLedger, Stages};
use stagehand_core::{BuildId, BuildStatus, Error, Result};
use stagehand_db::Claim;
use tracing::{debug, error, info, warn};

use crate::notify::{BuildEvent, MailMessage, Mailer, Notifier};
use crate::stores::Stores;

/// Conditional writes lost to a concurrent writer are retried this many times.
const MAX_STATUS_ATTEMPTS: usize = 3;

/// Phase named in a CI progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum ReportedPhase {
    Queued,
    Stage(Phase),
    Finished,
}

impl TryFrom<String> for ReportedPhase {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.as_str() {
            "queued" => Ok(ReportedPhase::Queued),
            "finished" => Ok(ReportedPhase::Finished),
            other => other.parse().map(ReportedPhase::Stage),
        }
    }
}

impl std::fmt::Display for ReportedPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportedPhase::Queued => f.write_str("queued"),
            ReportedPhase::Stage(phase) => phase.fmt(f),
            ReportedPhase::Finished => f.write_str("finished"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    #[default]
    Running,
    Succeeded,
    Failed,
}

/// A progress report posted by the CI pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PhaseReport {
    pub phase: ReportedPhase,
    #[serde(default)]
    pub outcome: PhaseOutcome,
}

/// Output locations and integrity result of a finished build.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputsReport {
    pub output_location: String,
    pub log_location: String,
    pub verified: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Result of closing a build.
#[derive(Debug, Clone)]
pub struct Termination {
    pub build: BuildRequest,
    pub ledger: Option<PhaseLedger>,
}

/// Single mutation path for build status and phase ledgers.
pub struct BuildTracker {
    stores: Stores,
    notifier: Notifier,
    mailer: Arc<dyn Mailer>,
}

impl BuildTracker {
    pub fn new(stores: Stores, notifier: Notifier, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            stores,
            notifier,
            mailer,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Register an uploaded bundle as a new build in `Uploaded`.
    pub async fn register(&self, new: &NewBuild) -> Result<BuildRequest> {
        if new.tag_name.trim().is_empty() {
            return Err(Error::invalid("tag name is required"));
        }
        if new.tag_name.contains('/') {
            return Err(Error::invalid("tag name must not contain '/'"));
        }
        if new.file_name.trim().is_empty() || new.file_hash.trim().is_empty() {
            return Err(Error::invalid("file name and hash are required"));
        }

        let build = self.stores.builds.create(new).await?;
        info!(
            build_id = %build.id,
            owner_id = %build.owner_id,
            project_id = %build.project_id,
            "Registered build"
        );
        Ok(build)
    }

    /// Hide a build from every lookup. Builds in flight cannot be deleted.
    pub async fn soft_delete(&self, id: BuildId) -> Result<()> {
        let build = self.stores.builds.get(id).await?;
        if build.status.is_in_flight() {
            return Err(Error::invalid("cannot delete a build in progress"));
        }
        self.stores.builds.soft_delete(id).await?;
        self.stores.ledgers.delete_for_build(id).await?;
        info!(build_id = %id, "Deleted build");
        Ok(())
    }

    /// Apply `next` if the build still holds the status it was read with.
    /// Returns `None` when a concurrent writer got there first.
    async fn try_set_status(
        &self,
        build: &BuildRequest,
        next: BuildStatus,
    ) -> Result<Option<BuildRequest>> {
        build.status.transition(next)?;
        if !self
            .stores
            .builds
            .update_status(build.id, build.status, next)
            .await?
        {
            return Ok(None);
        }

        debug!(build_id = %build.id, from = %build.status, to = %next, "Build status changed");
        self.notifier.publish(BuildEvent::StatusChanged {
            build_id: build.id,
            owner_id: build.owner_id,
            project_id: build.project_id,
            from: build.status,
            to: next,
        });

        let mut updated = build.clone();
        updated.status = next;
        updated.updated_at = Utc::now();
        Ok(Some(updated))
    }

    async fn set_status(&self, build: &BuildRequest, next: BuildStatus) -> Result<BuildRequest> {
        self.try_set_status(build, next).await?.ok_or_else(|| {
            Error::invalid(format!("build {} was modified concurrently", build.id))
        })
    }

    /// Move a build to `Starting`, enforcing one running build per owner.
    pub(crate) async fn claim_start(
        &self,
        build: &BuildRequest,
        send_notification: bool,
    ) -> Result<bool> {
        build.status.transition(BuildStatus::Starting)?;
        let claim = Claim {
            build_id: build.id,
            owner_id: build.owner_id,
            expected: build.status,
            next: BuildStatus::Starting,
            send_notification,
        };
        Ok(self.stores.builds.claim(&claim).await?)
    }

    /// Undo [`claim_start`](Self::claim_start), restoring the status `build`
    /// was read with.
    pub(crate) async fn release_claim(&self, build: &BuildRequest) {
        match self
            .stores
            .builds
            .update_status(build.id, BuildStatus::Starting, build.status)
            .await
        {
            Ok(true) => debug!(build_id = %build.id, status = %build.status, "Released start claim"),
            Ok(false) => warn!(build_id = %build.id, "Start claim changed before release"),
            Err(e) => error!(build_id = %build.id, error = %e, "Failed to release start claim"),
        }
    }

    /// Reset the existing ledger for a rebuild, or create the first one.
    pub(crate) async fn open_ledger(
        &self,
        build: &BuildRequest,
        existing: Option<PhaseLedger>,
    ) -> Result<PhaseLedger> {
        let now = Utc::now();
        let ledger = match existing {
            Some(mut ledger) => {
                ledger.restart(now);
                self.stores.ledgers.save(&ledger).await?;
                ledger
            }
            None => {
                self.stores
                    .ledgers
                    .create(
                        build.owner_id,
                        build.project_id,
                        build.id,
                        &Stages::started(now),
                    )
                    .await?
            }
        };
        Ok(ledger)
    }

    /// Broadcast a successful start. `build` is the row as read before the claim.
    pub(crate) fn announce_start(&self, build: &BuildRequest, ledger: &PhaseLedger) {
        self.notifier.publish(BuildEvent::StatusChanged {
            build_id: build.id,
            owner_id: build.owner_id,
            project_id: build.project_id,
            from: build.status,
            to: BuildStatus::Starting,
        });
        self.publish_ledger(ledger);
    }

    fn publish_ledger(&self, ledger: &PhaseLedger) {
        self.notifier.publish(BuildEvent::LedgerUpdated {
            build_id: ledger.build_id,
            owner_id: ledger.owner_id,
            ledger: ledger.clone(),
        });
    }

    async fn require_ledger(&self, id: BuildId) -> Result<PhaseLedger> {
        self.stores
            .ledgers
            .find_by_build(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("phase ledger for build {}", id)))
    }

    /// Apply a progress report from the CI pipeline.
    pub async fn report_phase(&self, id: BuildId, report: PhaseReport) -> Result<PhaseLedger> {
        let build = self.stores.builds.get(id).await?;
        // Checked before any write so a report for an unknown ledger changes nothing.
        let mut ledger = self.require_ledger(id).await?;

        if report.outcome == PhaseOutcome::Failed {
            let reason = format!("phase {} failed", report.phase);
            let termination = self.terminate(&build, Closure::Failed, &reason).await?;
            return termination
                .ledger
                .ok_or_else(|| Error::NotFound(format!("phase ledger for build {}", id)));
        }

        let now = Utc::now();

        match report.phase {
            ReportedPhase::Queued => {
                if build.status != BuildStatus::InQueue {
                    self.set_status(&build, BuildStatus::InQueue).await?;
                }
                ledger.mark_queued(now);
            }
            ReportedPhase::Stage(phase) => {
                let target = BuildStatus::from(phase);
                if build.status != target {
                    self.set_status(&build, target).await?;
                }
                ledger.enter(phase, now);
                if report.outcome == PhaseOutcome::Succeeded {
                    ledger.complete(phase, now);
                }
            }
            ReportedPhase::Finished => {
                let finished = self.set_status(&build, BuildStatus::Finished).await?;
                ledger.close(Closure::Finished, now);
                self.stores.ledgers.save(&ledger).await?;
                self.publish_ledger(&ledger);
                self.send_mail(&finished, "finished").await?;
                return Ok(ledger);
            }
        }

        self.stores.ledgers.save(&ledger).await?;
        self.publish_ledger(&ledger);
        Ok(ledger)
    }

    /// Record the artifact and verification results of a finished build.
    pub async fn record_outputs(&self, id: BuildId, report: OutputsReport) -> Result<BuildOutputs> {
        let build = self.stores.builds.get(id).await?;
        if build.status != BuildStatus::Finished {
            return Err(Error::invalid(
                "outputs can only be recorded for a finished build",
            ));
        }
        let mut ledger = self.require_ledger(id).await?;

        let now = Utc::now();
        let outputs = BuildOutputs {
            artifact: ArtifactRecord {
                build_id: id,
                output_location: report.output_location,
                log_location: report.log_location,
                recorded_at: now,
            },
            verification: FileVerify {
                build_id: id,
                verified: report.verified,
                detail: report.detail,
                checked_at: now,
            },
        };
        self.stores.outputs.record(&outputs).await?;

        ledger.download = report.verified;
        self.stores.ledgers.save(&ledger).await?;
        self.publish_ledger(&ledger);
        info!(build_id = %id, verified = report.verified, "Recorded build outputs");
        Ok(outputs)
    }

    /// Move an in-flight build to the terminal status for `closure` and close
    /// its ledger. A write lost to a concurrent phase report is retried
    /// against the fresh row as long as the build is still in flight.
    pub async fn terminate(
        &self,
        build: &BuildRequest,
        closure: Closure,
        reason: &str,
    ) -> Result<Termination> {
        let next = match closure {
            Closure::Finished => BuildStatus::Finished,
            Closure::Failed => BuildStatus::Failed,
            Closure::Stopped => BuildStatus::Stopped,
        };

        let mut current = build.clone();
        let mut attempts = 0;
        let updated = loop {
            attempts += 1;
            if let Some(updated) = self.try_set_status(&current, next).await? {
                break updated;
            }
            if attempts >= MAX_STATUS_ATTEMPTS {
                return Err(Error::invalid(format!(
                    "build {} was modified concurrently",
                    build.id
                )));
            }
            current = self.stores.builds.get(build.id).await?;
            if !current.status.is_in_flight() {
                return Err(Error::invalid(format!(
                    "build {} is no longer in progress",
                    build.id
                )));
            }
        };

        let ledger = match self.stores.ledgers.find_by_build(build.id).await? {
            Some(mut ledger) => {
                if !ledger.is_closed() {
                    ledger.close(closure, Utc::now());
                    self.stores.ledgers.save(&ledger).await?;
                    self.publish_ledger(&ledger);
                }
                Some(ledger)
            }
            None => None,
        };

        info!(build_id = %build.id, status = %next, reason = %reason, "Build terminated");
        if closure != Closure::Stopped {
            self.send_mail(&updated, reason).await?;
        }

        Ok(Termination {
            build: updated,
            ledger,
        })
    }

    async fn send_mail(&self, build: &BuildRequest, reason: &str) -> Result<()> {
        if !build.send_notification {
            return Ok(());
        }
        let message = MailMessage {
            owner_id: build.owner_id,
            build_id: build.id,
            subject: format!("Build {} {}", build.tag_name, build.status),
            body: format!(
                "Build {} ({}) of project {} ended with status {}: {}",
                build.id, build.tag_name, build.project_id, build.status, reason
            ),
        };
        self.mailer
            .send(&message)
            .await
            .map_err(|e| Error::Internal(e.to_string()))
    }
}
