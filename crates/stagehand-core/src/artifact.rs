//! Build output records.
//!
//! Both records are written once, when a build finishes, and are read-only
//! afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BuildId;

/// Object-storage locations of a finished build's outputs (`LogAndArtifact`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub build_id: BuildId,
    pub output_location: String,
    pub log_location: String,
    pub recorded_at: DateTime<Utc>,
}

/// Integrity check result of a finished build's outputs (`FileVerify`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVerify {
    pub build_id: BuildId,
    pub verified: bool,
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Both output records of a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildOutputs {
    pub artifact: ArtifactRecord,
    pub verification: FileVerify,
}
