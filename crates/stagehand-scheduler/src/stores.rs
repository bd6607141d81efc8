//! Persistence handles shared by the scheduler's components.

use sqlx::PgPool;
use stagehand_db::{
    BaselineRepo, BuildRepo, LedgerRepo, OutputsRepo, PgBaselineRepo, PgBuildRepo, PgLedgerRepo,
    PgOutputsRepo,
};
use std::sync::Arc;

/// The repositories the orchestrator, tracker and watchdog work against.
#[derive(Clone)]
pub struct Stores {
    pub builds: Arc<dyn BuildRepo>,
    pub ledgers: Arc<dyn LedgerRepo>,
    pub outputs: Arc<dyn OutputsRepo>,
    pub baselines: Arc<dyn BaselineRepo>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            builds: Arc::new(PgBuildRepo::new(pool.clone())),
            ledgers: Arc::new(PgLedgerRepo::new(pool.clone())),
            outputs: Arc::new(PgOutputsRepo::new(pool.clone())),
            baselines: Arc::new(PgBaselineRepo::new(pool)),
        }
    }
}
