//! Identifiers. Generated ids are 32-char lowercase hex from the OS RNG; parsed ids
//! (CLI, pool index, haves message) accept 1..=64 chars of `[0-9a-z_-]`.
//!
//! `SnapshotId` is assigned once when a volume is frozen and travels with every stream built
//! from that snapshot, so two pools holding "the same" snapshot agree on its id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::util::generate_hex_id;

macro_rules! hex_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl $name {
            pub fn generate() -> Self {
                Self(generate_hex_id())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                if !is_valid_id(s) {
                    return Err(format!(
                        "invalid {} '{}': expected 1..=64 chars of [0-9a-z_-]",
                        stringify!($name),
                        s
                    ));
                }
                Ok(Self(s.to_string()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

hex_id!(
    /// Pool identifier (also the last component of the engine namespace).
    PoolId
);
hex_id!(
    /// Local handle of a volume inside one pool.
    VolumeId
);
hex_id!(
    /// Global identity of a frozen snapshot.
    SnapshotId
);

/// Ids end up in dataset names and file paths, so keep the alphabet narrow.
pub fn is_valid_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_hex_and_distinct() {
        let a = SnapshotId::generate();
        let b = SnapshotId::generate();
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().bytes().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn parse_rejects_path_like_input() {
        assert!("abc123".parse::<VolumeId>().is_ok());
        assert!("../etc".parse::<VolumeId>().is_err());
        assert!("tank/vol".parse::<SnapshotId>().is_err());
        assert!("".parse::<PoolId>().is_err());
        assert!("ABC".parse::<PoolId>().is_err());
    }

    #[test]
    fn deserialize_validates() {
        let ok: SnapshotId = serde_json::from_str("\"ab12-x\"").unwrap();
        assert_eq!(ok.as_str(), "ab12-x");
        assert_eq!(serde_json::to_string(&ok).unwrap(), "\"ab12-x\"");
        assert!(serde_json::from_str::<SnapshotId>("\"../../etc\"").is_err());
        assert!(serde_json::from_str::<VolumeId>("\"a/b\"").is_err());
        assert!(serde_json::from_str::<PoolId>("\"\"").is_err());
    }
}
