//! Core domain types and traits for stagehand.
//!
//! This crate contains:
//! - Typed identifiers for builds, projects, owners and ledgers
//! - The build status state machine and its transition table
//! - The per-build phase ledger
//! - Build request, baseline and artifact/verification records
//! - The `CiEngine` trait and the CI engine's response schemas

pub mod artifact;
pub mod baseline;
pub mod build;
pub mod ci;
pub mod error;
pub mod id;
pub mod ledger;
pub mod status;

pub use error::{Error, Result};
pub use id::{BuildId, LedgerId, OwnerId, ProjectId};
pub use status::BuildStatus;
