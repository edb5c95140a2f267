//! Identity types for schema objects, segments and scenarios

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Declares a string-backed identifier for a named schema object.
///
/// Schema objects are identified by the names the catalog gives them, so the
/// newtypes only exist to keep a star name from being passed where a measure
/// name is expected.
macro_rules! name_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from a catalog name.
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            /// Get the catalog name.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self::new(name)
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(name)
            }
        }
    };
}

name_id! {
    /// Identifies a loaded schema (cube definitions sharing one catalog).
    SchemaId
}

name_id! {
    /// Identifies a star: one fact table plus its joined dimension tables.
    StarId
}

name_id! {
    /// Identifies a stored measure of a star.
    MeasureId
}

/// Scenario identifier using UUIDv7 for creation-ordered IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioId(Uuid);

impl ScenarioId {
    /// Generate a new scenario id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ScenarioId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable content digest of a segment header, hex encoded.
///
/// Two structurally equal headers always produce the same id, so it can be
/// used in logs and monitoring output to correlate loads across queries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderId(String);

impl HeaderId {
    /// Compute the id from the canonical encoding of a header.
    pub fn digest(canonical: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical);
        Self(hex::encode(hasher.finalize()))
    }

    /// Get the full hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get an abbreviated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for HeaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}
