//! KDL configuration parsing for stagehand.
//!
//! The system configuration (`stagehand.kdl`) holds the server, database,
//! CI engine and watchdog settings. Environment variables override the file.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    DatabaseConfig, JenkinsConfig, ServerConfig, SystemConfig, WatchdogConfig, load_system_config,
    parse_system_config,
};
