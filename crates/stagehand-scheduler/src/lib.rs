//! Build orchestration for stagehand.
//!
//! Drives build requests through the CI engine's intake protocol, owns the
//! single path through which build status changes, and runs the watchdog
//! that force-fails builds which stopped making progress.

pub mod admission;
pub mod notify;
pub mod orchestrator;
pub mod stores;
pub mod tracker;
pub mod watchdog;

#[cfg(test)]
mod testing;

pub use admission::BuildQueries;
pub use notify::{BuildEvent, LogMailer, MailError, MailMessage, Mailer, Notifier};
pub use orchestrator::{BuildOrchestrator, IntakeSettings, InvokeRequest};
pub use stores::Stores;
pub use tracker::{BuildTracker, OutputsReport, PhaseOutcome, PhaseReport, ReportedPhase, Termination};
pub use watchdog::{RestartPolicy, SweepReport, Watchdog, WatchdogError, spawn_supervised};
