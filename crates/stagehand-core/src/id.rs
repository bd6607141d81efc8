//! Resource identifiers.
//!
//! Rows are keyed by database sequences, so every identifier is an `i64`
//! wrapped in its own type to keep build, project and owner ids apart.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From,
        )]
        #[serde(transparent)]
        #[display("{_0}")]
        pub struct $name(i64);

        impl $name {
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Get the raw database value.
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

define_id!(
    /// Identifier of a build request.
    BuildId
);
define_id!(
    /// Identifier of a project.
    ProjectId
);
define_id!(
    /// Identifier of the user who owns a build.
    OwnerId
);
define_id!(
    /// Identifier of a phase ledger row.
    LedgerId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_parse_and_display() {
        let id: BuildId = "42".parse().unwrap();
        assert_eq!(id, BuildId::new(42));
        assert_eq!(id.to_string(), "42");
        assert!("forty-two".parse::<BuildId>().is_err());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&OwnerId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}
