//! Project baselines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ProjectId;

/// Reference configuration a project must have before it can be built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub id: i64,
    pub project_id: ProjectId,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
