//! Repository traits and implementations.

pub mod baseline;
pub mod build;
pub mod ledger;
pub mod outputs;

pub use baseline::{BaselineRepo, PgBaselineRepo};
pub use build::{BuildRepo, Claim, PgBuildRepo};
pub use ledger::{LedgerRepo, PgLedgerRepo};
pub use outputs::{OutputsRepo, PgOutputsRepo};
