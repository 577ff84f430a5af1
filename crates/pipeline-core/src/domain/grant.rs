//! Permission grants between a function's execution identity and the bucket.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::bucket::BucketName;

/// Execution identity of a stage function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Right {
    Read,
    Write,
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Right::Read => f.write_str("read"),
            Right::Write => f.write_str("write"),
        }
    }
}

/// Set of rights on a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rights {
    pub read: bool,
    pub write: bool,
}

impl Rights {
    pub const READ: Rights = Rights {
        read: true,
        write: false,
    };
    pub const WRITE: Rights = Rights {
        read: false,
        write: true,
    };
    pub const READ_WRITE: Rights = Rights {
        read: true,
        write: true,
    };

    pub fn contains(self, right: Right) -> bool {
        match right {
            Right::Read => self.read,
            Right::Write => self.write,
        }
    }

    pub fn union(self, other: Rights) -> Rights {
        Rights {
            read: self.read || other.read,
            write: self.write || other.write,
        }
    }
}

/// `principal` may exercise `rights` on `bucket`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub principal: Principal,
    pub bucket: BucketName,
    pub rights: Rights,
}

impl PermissionGrant {
    pub fn allows(&self, principal: &Principal, bucket: &BucketName, right: Right) -> bool {
        &self.principal == principal && &self.bucket == bucket && self.rights.contains(right)
    }
}
