//! Error types for stagehand.

use thiserror::Error;

use crate::ci::CiError;

/// Message returned when a build is already queued or running.
pub const BUILD_IN_PROGRESS: &str = "build already in progress";
/// Message returned when the project has no active baseline.
pub const NO_BASELINE: &str = "no baseline defined for this project";
/// Context for failures of the intake queue/last-build checks.
pub const INVOKING_JENKINS: &str = "Error while invoking Jenkins";
/// Context for failures of the start-build call.
pub const STARTING_BUILD: &str = "Error while starting build";
/// Context for failures while cancelling a build's job.
pub const STOPPING_BUILD: &str = "Error while stopping build";
/// Message returned when stopping a build that is not in flight.
pub const NOTHING_TO_STOP: &str = "nothing to stop";

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidOperation(String),

    #[error("{context}: {source}")]
    ExternalProtocol {
        context: &'static str,
        #[source]
        source: CiError,
    },

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidOperation(message.into())
    }

    pub fn protocol(context: &'static str, source: CiError) -> Self {
        Error::ExternalProtocol { context, source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
