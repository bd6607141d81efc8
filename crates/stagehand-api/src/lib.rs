//! API server for stagehand.
//!
//! Provides the build REST API, the CI callback endpoints and the WebSocket
//! notification channel.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;
