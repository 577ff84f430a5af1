//! Subscription: bucket + prefix filter -> target function.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bucket::BucketName;
use super::function::FunctionName;
use super::ids::SubscriptionId;
use super::object::{KeyPrefix, ObjectKey};

/// Declared notification binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    pub bucket: BucketName,
    pub prefix: KeyPrefix,
    pub target: FunctionName,
}

/// A bound subscription. At most one exists per (bucket, prefix).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub spec: SubscriptionSpec,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn matches(&self, bucket: &BucketName, key: &ObjectKey) -> bool {
        &self.spec.bucket == bucket && self.spec.prefix.matches(key)
    }
}
