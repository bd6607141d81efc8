//! CI engine trait and response schemas.
//!
//! The CI engine is a Jenkins-compatible build server. A shared intake job
//! serializes job creation; every build then runs in its own job named by
//! [`JobName`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::build::{BuildRequest, JobName};

/// Queue state of the intake job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    #[serde(rename = "inQueue")]
    pub in_queue: bool,
}

/// Outcome of a finished CI build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildResult {
    Success,
    Failure,
    Unstable,
    Aborted,
    NotBuilt,
}

/// The intake job's most recent build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastBuild {
    #[serde(rename = "inProgress")]
    pub in_progress: bool,
    /// `None` while the build is still running.
    pub result: Option<BuildResult>,
}

/// Parameters passed to a per-build job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParameters(Vec<(String, String)>);

impl BuildParameters {
    pub fn for_build(build: &BuildRequest) -> Self {
        Self(vec![
            ("BUILD_ID".to_string(), build.id.to_string()),
            ("PROJECT_ID".to_string(), build.project_id.to_string()),
            ("OWNER_ID".to_string(), build.owner_id.to_string()),
            ("TAG_NAME".to_string(), build.tag_name.clone()),
            ("FILE_NAME".to_string(), build.file_name.clone()),
            ("FILE_HASH".to_string(), build.file_hash.clone()),
            ("DEVELOPER".to_string(), build.developer.clone()),
        ])
    }

    pub fn as_pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum CiError {
    #[error("HTTP {status} from {path}")]
    Http { status: u16, path: String },

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("missing field `{field}` in response from {path}")]
    MissingField { field: &'static str, path: String },

    #[error("malformed response from {path}: {message}")]
    Malformed { path: String, message: String },

    #[error("intake job's last build reported FAILURE")]
    LastBuildFailed,

    #[error("transport error: {0}")]
    Transport(String),
}

pub type CiResult<T> = std::result::Result<T, CiError>;

/// Trait for CI engine clients.
#[async_trait]
pub trait CiEngine: Send + Sync {
    /// Name of this engine.
    fn name(&self) -> &'static str;

    /// Read whether the intake job has a queued item.
    async fn intake_queue(&self) -> CiResult<QueueState>;

    /// Read the intake job's last build.
    async fn intake_last_build(&self) -> CiResult<LastBuild>;

    /// Trigger the per-build job with parameters.
    async fn start_build(&self, job: &JobName, params: &BuildParameters) -> CiResult<()>;

    /// Check whether a per-build job exists.
    async fn job_exists(&self, job: &JobName) -> CiResult<bool>;

    /// Delete a per-build job, cancelling anything it is running.
    async fn delete_job(&self, job: &JobName) -> CiResult<()>;
}
