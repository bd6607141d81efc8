//! Watchdog: force-fails builds that stopped making progress.
//!
//! On every tick the watchdog lists in-flight builds whose status has not
//! changed for longer than the stale threshold, then checks each one's phase
//! ledger. A missing ledger, or one with no activity since the cutoff, fails
//! the build through the tracker.
//!
//! A listing error ends the loop with [`WatchdogError::Fatal`]. The loop
//! runs under [`spawn_supervised`], which restarts it a bounded number of
//! times before giving up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use stagehand_config::WatchdogConfig;
use stagehand_core::build::BuildRequest;
use stagehand_core::ledger::Closure;
use stagehand_core::{BuildId, Result};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::notify::BuildEvent;
use crate::stores::Stores;
use crate::tracker::BuildTracker;

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("watchdog could not list candidate builds: {0}")]
    Fatal(String),

    #[error("watchdog gave up after {restarts} restarts: {last}")]
    Exhausted { restarts: u32, last: String },
}

impl From<WatchdogError> for stagehand_core::Error {
    fn from(err: WatchdogError) -> Self {
        stagehand_core::Error::Fatal(err.to_string())
    }
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Builds force-failed during the sweep.
    pub failed: Vec<BuildId>,
    /// Stale candidates whose ledger still showed recent activity.
    pub skipped: usize,
    /// Candidates that could not be checked or failed.
    pub errors: usize,
}

pub struct Watchdog {
    stores: Stores,
    tracker: Arc<BuildTracker>,
    interval: Duration,
    stale_after: chrono::Duration,
}

impl Watchdog {
    pub fn new(
        stores: Stores,
        tracker: Arc<BuildTracker>,
        interval: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            stores,
            tracker,
            interval,
            stale_after: chrono::Duration::from_std(stale_after)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn from_config(stores: Stores, tracker: Arc<BuildTracker>, config: &WatchdogConfig) -> Self {
        Self::new(stores, tracker, config.interval, config.stale_after)
    }

    /// Check every stale candidate once.
    pub async fn sweep(&self, now: DateTime<Utc>) -> std::result::Result<SweepReport, WatchdogError> {
        self.sweep_until(now, &CancellationToken::new()).await
    }

    /// Like [`sweep`](Self::sweep), but stops before the next candidate once
    /// `token` is cancelled. A reconcile already under way always completes.
    pub async fn sweep_until(
        &self,
        now: DateTime<Utc>,
        token: &CancellationToken,
    ) -> std::result::Result<SweepReport, WatchdogError> {
        let cutoff = now
            .checked_sub_signed(self.stale_after)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let candidates = self
            .stores
            .builds
            .list_stale(cutoff)
            .await
            .map_err(|e| WatchdogError::Fatal(e.to_string()))?;

        let mut report = SweepReport::default();
        for build in candidates {
            if token.is_cancelled() {
                break;
            }
            match self.reconcile(&build, cutoff).await {
                Ok(true) => report.failed.push(build.id),
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(build_id = %build.id, error = %e, "Watchdog could not reconcile build");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    async fn reconcile(&self, build: &BuildRequest, cutoff: DateTime<Utc>) -> Result<bool> {
        let ledger = self.stores.ledgers.find_by_build(build.id).await?;
        let last_activity = ledger.as_ref().and_then(|l| l.last_activity());
        if matches!(last_activity, Some(at) if at >= cutoff) {
            return Ok(false);
        }

        let reason = match last_activity {
            Some(at) => format!("no progress since {}", at.to_rfc3339()),
            None => "no phase ledger".to_string(),
        };
        self.tracker
            .terminate(build, Closure::Failed, &reason)
            .await?;
        warn!(build_id = %build.id, status = %build.status, reason = %reason, "Force-failed stalled build");
        self.tracker.notifier().publish(BuildEvent::ForcedFailure {
            build_id: build.id,
            owner_id: build.owner_id,
            reason,
        });
        Ok(true)
    }

    /// Sweep on every tick until cancelled.
    pub async fn run(&self, token: &CancellationToken) -> std::result::Result<(), WatchdogError> {
        info!(
            interval_secs = self.interval.as_secs(),
            stale_after_hours = self.stale_after.num_hours(),
            "Watchdog started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.sweep_until(Utc::now(), token).await?;
            debug!(
                failed = report.failed.len(),
                skipped = report.skipped,
                errors = report.errors,
                "Watchdog tick"
            );
        }

        info!("Watchdog stopped");
        Ok(())
    }
}

/// Restart limits for the supervised watchdog.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub backoff: Duration,
}

impl RestartPolicy {
    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            backoff: config.restart_backoff,
        }
    }
}

/// Run the watchdog in a background task, restarting it after fatal errors.
///
/// The handle resolves with `Ok(())` on cancellation and with
/// [`WatchdogError::Exhausted`] once the policy's restarts are used up.
pub fn spawn_supervised(
    watchdog: Arc<Watchdog>,
    policy: RestartPolicy,
    token: CancellationToken,
) -> JoinHandle<std::result::Result<(), WatchdogError>> {
    tokio::spawn(async move {
        let mut restarts = 0;
        loop {
            let err = match watchdog.run(&token).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            error!(error = %err, restarts, "Watchdog failed");

            if restarts >= policy.max_restarts {
                return Err(WatchdogError::Exhausted {
                    restarts,
                    last: err.to_string(),
                });
            }
            restarts += 1;

            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(policy.backoff) => {}
            }
            warn!(restarts, "Restarting watchdog");
        }
    })
}
