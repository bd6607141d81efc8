//! Read-only projections over the build request store.
//!
//! Admission itself is enforced by the orchestrator's preconditions and the
//! conditional claim; these views let the watchdog, the UI and the CLI see
//! what is running and what is waiting.

use stagehand_core::artifact::BuildOutputs;
use stagehand_core::build::BuildRequest;
use stagehand_core::ledger::PhaseLedger;
use stagehand_core::{BuildId, Error, OwnerId, Result};

use crate::stores::Stores;

pub struct BuildQueries {
    stores: Stores,
}

impl BuildQueries {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub async fn build(&self, id: BuildId) -> Result<BuildRequest> {
        Ok(self.stores.builds.get(id).await?)
    }

    /// Builds executing a pipeline phase.
    pub async fn in_progress(&self) -> Result<Vec<BuildRequest>> {
        Ok(self.stores.builds.list_in_progress().await?)
    }

    /// Builds held in the CI engine's queue.
    pub async fn in_queue(&self) -> Result<Vec<BuildRequest>> {
        Ok(self.stores.builds.list_in_queue().await?)
    }

    pub async fn first_queued(&self, owner_id: OwnerId) -> Result<Option<BuildRequest>> {
        Ok(self.stores.builds.first_queued(owner_id).await?)
    }

    pub async fn latest_uploaded(&self, owner_id: OwnerId) -> Result<Option<BuildRequest>> {
        Ok(self.stores.builds.latest_uploaded(owner_id).await?)
    }

    pub async fn ledger(&self, build_id: BuildId) -> Result<PhaseLedger> {
        // Deleted builds hide their ledger too.
        self.stores.builds.get(build_id).await?;
        self.stores
            .ledgers
            .find_by_build(build_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("phase ledger for build {}", build_id)))
    }

    pub async fn outputs(&self, build_id: BuildId) -> Result<BuildOutputs> {
        self.stores.builds.get(build_id).await?;
        self.stores
            .outputs
            .get(build_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("outputs for build {}", build_id)))
    }
}
