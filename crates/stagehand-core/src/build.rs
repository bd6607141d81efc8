//! Build request types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BuildId, BuildStatus, OwnerId, ProjectId};

/// One upload-to-build lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub id: BuildId,
    pub project_id: ProjectId,
    pub owner_id: OwnerId,
    /// Name of the developer who uploaded the bundle.
    pub developer: String,
    pub uploaded_at: DateTime<Utc>,
    pub tag_name: String,
    pub tag_description: String,
    /// Uploaded bundle file name.
    pub file_name: String,
    /// Content hash of the uploaded bundle.
    pub file_hash: String,
    pub status: BuildStatus,
    /// Email the owner when the build reaches a terminal phase.
    pub send_notification: bool,
    pub deleted: bool,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
}

impl BuildRequest {
    /// Name of this build's job on the CI engine.
    pub fn job_name(&self) -> JobName {
        JobName::new(self.project_id, self.owner_id, &self.tag_name)
    }
}

/// Metadata for registering an uploaded bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBuild {
    pub project_id: ProjectId,
    pub owner_id: OwnerId,
    pub developer: String,
    pub tag_name: String,
    #[serde(default)]
    pub tag_description: String,
    pub file_name: String,
    pub file_hash: String,
}

/// Per-build CI job name, `{project}_{owner}_{tag}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobName(String);

impl JobName {
    pub fn new(project_id: ProjectId, owner_id: OwnerId, tag_name: &str) -> Self {
        Self(format!("{}_{}_{}", project_id, owner_id, tag_name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
