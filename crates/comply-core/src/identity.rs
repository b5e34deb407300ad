//! # Identifier Newtypes
//!
//! Newtype wrappers for every identifier the engine passes around. You
//! cannot hand a `ServiceKey` to something that expects a
//! `JurisdictionCode`. String-backed identifiers validate on construction
//! and on deserialization (`#[serde(try_from = "String")]`), so a value
//! that exists is a value that is well-formed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

const MAX_KEY_LEN: usize = 64;

/// Immutable identity of a service definition (e.g. `gst-monthly`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceKey(String);

impl ServiceKey {
    /// Create a validated service key: 1-64 chars of `[A-Za-z0-9_-]`.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        let valid = !s.is_empty()
            && s.len() <= MAX_KEY_LEN
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(Self(s))
        } else {
            Err(ValidationError::InvalidServiceKey(s))
        }
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Jurisdiction code (e.g. `IN-KA`, `US`). Normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JurisdictionCode(String);

impl JurisdictionCode {
    /// Create a validated jurisdiction code: 2-16 chars of `[A-Z0-9-]`
    /// after upper-casing.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into().trim().to_ascii_uppercase();
        let valid = (2..=16).contains(&s.len())
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if valid {
            Ok(Self(s))
        } else {
            Err(ValidationError::InvalidJurisdiction(s))
        }
    }

    /// Borrow the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier of the client entity an obligation is owed by.
///
/// Entities are owned by the surrounding application, so this is an
/// opaque string rather than a UUID minted here.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Create an entity id: non-empty after trimming, at most 128 chars.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into().trim().to_string();
        if s.is_empty() || s.len() > 128 {
            return Err(ValidationError::InvalidEntityId(s));
        }
        Ok(Self(s))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_id_impls {
    ($name:ident) => {
        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id_impls!(ServiceKey);
string_id_impls!(JurisdictionCode);
string_id_impls!(EntityId);

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Access the inner UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier of an obligation instance.
    InstanceId,
    "obligation"
);
uuid_id!(
    /// Unique identifier of a due-date rule.
    RuleId,
    "rule"
);
uuid_id!(
    /// Unique identifier of a quality review.
    ReviewId,
    "review"
);
