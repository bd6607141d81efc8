//! Jenkins-compatible CI engine client for stagehand.
//!
//! Implements [`stagehand_core::ci::CiEngine`] over the engine's JSON API.

pub mod client;

pub use client::JenkinsClient;
