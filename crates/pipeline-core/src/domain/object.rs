//! Objects, key prefixes and object-creation notifications.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bucket::BucketName;
use super::errors::ValidationError;
use super::ids::EventId;

/// Key of an object inside a bucket (`raw/openweather-2024-01-01.csv`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn parse(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        if key.is_empty() || key.starts_with('/') || key.len() > 1024 {
            return Err(ValidationError::InvalidObjectKey(key));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ObjectKey> for String {
    fn from(value: ObjectKey) -> Self {
        value.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A key-prefix filter such as `raw/`.
///
/// Always ends with `/` so that `raw/` never matches `rawdata/...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyPrefix(String);

impl KeyPrefix {
    pub fn parse(prefix: impl Into<String>) -> Result<Self, ValidationError> {
        let prefix = prefix.into();
        if prefix.len() < 2 || !prefix.ends_with('/') || prefix.starts_with('/') {
            return Err(ValidationError::InvalidPrefix(prefix));
        }
        Ok(Self(prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, key: &ObjectKey) -> bool {
        key.as_str().starts_with(&self.0)
    }

    /// No key can match both prefixes.
    pub fn is_disjoint(&self, other: &KeyPrefix) -> bool {
        !self.0.starts_with(&other.0) && !other.0.starts_with(&self.0)
    }

    /// Build a key below this prefix.
    pub fn join(&self, name: &str) -> Result<ObjectKey, ValidationError> {
        ObjectKey::parse(format!("{}{}", self.0, name.trim_start_matches('/')))
    }
}

impl TryFrom<String> for KeyPrefix {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<KeyPrefix> for String {
    fn from(value: KeyPrefix) -> Self {
        value.0
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An object as returned by a read.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub key: ObjectKey,
    pub data: Bytes,
    pub created_at: DateTime<Utc>,
}

/// Precondition for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if no object exists under the key.
    DoesNotExist,
    /// Write unconditionally.
    None,
}

/// Result of a write. A failed precondition is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Created { created_at: DateTime<Utc> },
    PreconditionFailed,
}

/// Notification emitted by the store after an object has been durably written.
///
/// This is also the payload the transform stage receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCreated {
    pub event_id: EventId,
    pub bucket: BucketName,
    pub key: ObjectKey,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}
