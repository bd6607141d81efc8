//! Notification fan-out.
//!
//! Status and ledger changes are broadcast to connected clients. Delivery is
//! fire-and-forget: a send with no subscribers is not an error, and a slow
//! subscriber that lags behind simply misses events.

use async_trait::async_trait;
use serde::Serialize;
use stagehand_core::ledger::PhaseLedger;
use stagehand_core::{BuildId, BuildStatus, OwnerId, ProjectId};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Event emitted when a build changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildEvent {
    StatusChanged {
        build_id: BuildId,
        owner_id: OwnerId,
        project_id: ProjectId,
        from: BuildStatus,
        to: BuildStatus,
    },
    LedgerUpdated {
        build_id: BuildId,
        owner_id: OwnerId,
        ledger: PhaseLedger,
    },
    ForcedFailure {
        build_id: BuildId,
        owner_id: OwnerId,
        reason: String,
    },
}

impl BuildEvent {
    pub fn build_id(&self) -> BuildId {
        match self {
            BuildEvent::StatusChanged { build_id, .. }
            | BuildEvent::LedgerUpdated { build_id, .. }
            | BuildEvent::ForcedFailure { build_id, .. } => *build_id,
        }
    }

    pub fn owner_id(&self) -> OwnerId {
        match self {
            BuildEvent::StatusChanged { owner_id, .. }
            | BuildEvent::LedgerUpdated { owner_id, .. }
            | BuildEvent::ForcedFailure { owner_id, .. } => *owner_id,
        }
    }
}

/// Broadcasts build events to every subscriber.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<BuildEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: BuildEvent) {
        let build_id = event.build_id();
        match self.tx.send(event) {
            Ok(receivers) => debug!(build_id = %build_id, receivers, "Published build event"),
            Err(_) => debug!(build_id = %build_id, "No subscribers for build event"),
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A completion email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    /// Recipient; the mail collaborator resolves the address.
    pub owner_id: OwnerId,
    pub build_id: BuildId,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

/// Trait for email delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// Mailer that writes messages to the log instead of delivering them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        info!(
            owner_id = %message.owner_id,
            build_id = %message.build_id,
            subject = %message.subject,
            "Build notification email"
        );
        Ok(())
    }
}
