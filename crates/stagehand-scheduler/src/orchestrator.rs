//! Build orchestration against the CI engine.
//!
//! `invoke` takes a build from `Uploaded` (or a terminal status, for a
//! rebuild) to `Starting`:
//!
//! 1. Preconditions: the build exists, is not in flight, and its project
//!    has a baseline. No CI call is made before these pass.
//! 2. The shared intake job must be idle: its queue empty and its last
//!    build not in progress. A busy intake job is polled until the
//!    configured wait runs out.
//! 3. The build is claimed with a conditional write, the per-build job is
//!    started, and the phase ledger is opened. A failed start releases the
//!    claim so the build is left as it was found.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use stagehand_config::JenkinsConfig;
use stagehand_core::build::BuildRequest;
use stagehand_core::ci::{BuildParameters, BuildResult, CiEngine, CiError};
use stagehand_core::error::{
    BUILD_IN_PROGRESS, INVOKING_JENKINS, NO_BASELINE, NOTHING_TO_STOP, STARTING_BUILD,
    STOPPING_BUILD,
};
use stagehand_core::ledger::{Closure, PhaseLedger};
use stagehand_core::{BuildId, Error, OwnerId, ProjectId, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stores::Stores;
use crate::tracker::BuildTracker;

/// How long to wait for a busy intake job.
#[derive(Debug, Clone, Copy)]
pub struct IntakeSettings {
    pub intake_wait: Duration,
    pub poll_interval: Duration,
}

impl IntakeSettings {
    pub fn from_config(config: &JenkinsConfig) -> Self {
        Self {
            intake_wait: config.intake_wait,
            poll_interval: config.poll_interval,
        }
    }
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self::from_config(&JenkinsConfig::default())
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct InvokeRequest {
    pub owner_id: OwnerId,
    pub project_id: ProjectId,
    pub build_id: BuildId,
    #[serde(default)]
    pub send_notification: bool,
    #[serde(default)]
    pub rebuild: bool,
}

/// Race `fut` against cancellation.
async fn cancellable<T>(token: &CancellationToken, fut: impl Future<Output = T>) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        out = fut => Ok(out),
    }
}

/// Drives builds through the CI engine's intake protocol.
pub struct BuildOrchestrator {
    stores: Stores,
    ci: Arc<dyn CiEngine>,
    tracker: Arc<BuildTracker>,
    settings: IntakeSettings,
}

impl BuildOrchestrator {
    pub fn new(
        stores: Stores,
        ci: Arc<dyn CiEngine>,
        tracker: Arc<BuildTracker>,
        settings: IntakeSettings,
    ) -> Self {
        Self {
            stores,
            ci,
            tracker,
            settings,
        }
    }

    /// Start a build on the CI engine and return its opened phase ledger.
    pub async fn invoke(
        &self,
        req: InvokeRequest,
        token: &CancellationToken,
    ) -> Result<PhaseLedger> {
        let build = self.check_preconditions(&req).await?;

        let existing = self.stores.ledgers.find_by_build(build.id).await?;
        match (req.rebuild, &existing) {
            (true, None) => {
                return Err(Error::NotFound(format!(
                    "phase ledger for build {}",
                    build.id
                )));
            }
            (false, Some(_)) => {
                return Err(Error::invalid(
                    "build has already been invoked; request a rebuild",
                ));
            }
            _ => {}
        }

        if self
            .stores
            .builds
            .owner_has_running(build.owner_id, build.id)
            .await?
        {
            return Err(Error::invalid(
                "another build is already running for this owner",
            ));
        }

        self.wait_for_intake(token).await?;

        if !self
            .tracker
            .claim_start(&build, req.send_notification)
            .await?
        {
            return Err(Error::invalid(BUILD_IN_PROGRESS));
        }

        let job = build.job_name();
        let params = BuildParameters::for_build(&build);
        let started = cancellable(token, self.ci.start_build(&job, &params))
            .await
            .and_then(|r| r.map_err(|e| Error::protocol(STARTING_BUILD, e)));
        if let Err(e) = started {
            warn!(build_id = %build.id, job = %job, error = %e, "Start build failed");
            self.tracker.release_claim(&build).await;
            return Err(e);
        }

        // The job is running from here on; a ledger failure leaves the build
        // in `Starting` for the watchdog to reconcile.
        let ledger = self
            .tracker
            .open_ledger(&build, existing)
            .await
            .inspect_err(|e| {
                warn!(build_id = %build.id, error = %e, "Failed to open phase ledger")
            })?;

        self.tracker.announce_start(&build, &ledger);
        info!(
            build_id = %build.id,
            job = %job,
            rebuild = req.rebuild,
            engine = self.ci.name(),
            "Build started"
        );
        Ok(ledger)
    }

    async fn check_preconditions(&self, req: &InvokeRequest) -> Result<BuildRequest> {
        let build = self.stores.builds.get(req.build_id).await?;
        if build.owner_id != req.owner_id || build.project_id != req.project_id {
            return Err(Error::invalid(format!(
                "build {} does not belong to owner {} and project {}",
                build.id, req.owner_id, req.project_id
            )));
        }
        if build.status.is_in_flight() {
            return Err(Error::invalid(BUILD_IN_PROGRESS));
        }
        if self
            .stores
            .baselines
            .active_for_project(build.project_id)
            .await?
            .is_none()
        {
            return Err(Error::invalid(NO_BASELINE));
        }
        Ok(build)
    }

    /// Wait until the intake job is idle, or give up after the intake wait.
    async fn wait_for_intake(&self, token: &CancellationToken) -> Result<()> {
        let deadline = Instant::now() + self.settings.intake_wait;
        loop {
            if !self.intake_busy(token).await? {
                return Ok(());
            }
            if Instant::now() + self.settings.poll_interval > deadline {
                return Err(Error::invalid("CI intake job is busy"));
            }
            debug!("CI intake job busy, polling");
            cancellable(token, tokio::time::sleep(self.settings.poll_interval)).await?;
        }
    }

    async fn intake_busy(&self, token: &CancellationToken) -> Result<bool> {
        let queue = cancellable(token, self.ci.intake_queue())
            .await?
            .map_err(|e| Error::protocol(INVOKING_JENKINS, e))?;
        if queue.in_queue {
            return Ok(true);
        }

        let last = cancellable(token, self.ci.intake_last_build())
            .await?
            .map_err(|e| Error::protocol(INVOKING_JENKINS, e))?;
        if last.result == Some(BuildResult::Failure) {
            return Err(Error::protocol(INVOKING_JENKINS, CiError::LastBuildFailed));
        }
        Ok(last.in_progress)
    }

    /// Cancel an in-flight build's CI job and mark the build stopped. A job
    /// the engine no longer knows about counts as already stopped.
    pub async fn stop_build(&self, id: BuildId, token: &CancellationToken) -> Result<BuildRequest> {
        let build = self.stores.builds.get(id).await?;
        if !build.status.is_in_flight() {
            return Err(Error::invalid(NOTHING_TO_STOP));
        }

        let job = build.job_name();
        let exists = cancellable(token, self.ci.job_exists(&job))
            .await?
            .map_err(|e| Error::protocol(STOPPING_BUILD, e))?;

        if exists {
            match cancellable(token, self.ci.delete_job(&job)).await? {
                Ok(()) => info!(build_id = %id, job = %job, "Deleted CI job"),
                Err(CiError::JobNotFound(_)) => {
                    debug!(build_id = %id, job = %job, "CI job vanished before delete")
                }
                Err(e) => return Err(Error::protocol(STOPPING_BUILD, e)),
            }
        } else {
            info!(build_id = %id, job = %job, "CI job missing, treating build as stopped");
        }

        let termination = self
            .tracker
            .terminate(&build, Closure::Stopped, "stopped by request")
            .await?;
        Ok(termination.build)
    }
}
