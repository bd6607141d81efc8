//! Application state.

use sqlx::PgPool;
use stagehand_core::ci::CiEngine;
use stagehand_scheduler::{
    BuildOrchestrator, BuildQueries, BuildTracker, IntakeSettings, Mailer, Notifier, Stores,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub queries: Arc<BuildQueries>,
    pub tracker: Arc<BuildTracker>,
    pub orchestrator: Arc<BuildOrchestrator>,
    pub notifier: Notifier,
    /// Cancelled when the server shuts down; requests run on child tokens.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        ci: Arc<dyn CiEngine>,
        mailer: Arc<dyn Mailer>,
        settings: IntakeSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let stores = Stores::postgres(pool.clone());
        let notifier = Notifier::default();
        let tracker = Arc::new(BuildTracker::new(
            stores.clone(),
            notifier.clone(),
            mailer,
        ));
        let orchestrator = Arc::new(BuildOrchestrator::new(
            stores.clone(),
            ci,
            tracker.clone(),
            settings,
        ));

        Self {
            pool,
            queries: Arc::new(BuildQueries::new(stores)),
            tracker,
            orchestrator,
            notifier,
            shutdown,
        }
    }
}
