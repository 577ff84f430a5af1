//! Bucket reconciliation.
//!
//! `ensure_bucket` is desired-state reconciliation rather than
//! check-then-create: the plan is a pure function of (desired, observed), and
//! applying `Create` relies on the store's create-if-absent semantics, so a
//! concurrent creator from the same account is adopted instead of reported.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::{AccountId, BucketHandle, BucketName};
use crate::ports::{ObjectStore, StorageError};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("bucket {bucket} exists but is owned by account {owner}")]
    OwnedElsewhere { bucket: BucketName, owner: AccountId },

    #[error("could not read state of bucket {bucket}: {source}")]
    Describe {
        bucket: BucketName,
        #[source]
        source: StorageError,
    },

    #[error("creating bucket {bucket} failed: {source}")]
    Create {
        bucket: BucketName,
        #[source]
        source: StorageError,
    },
}

/// Desired state of the bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: BucketName,
    pub owner: AccountId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketPlan {
    Create,
    Adopt(BucketHandle),
    Conflict { owner: AccountId },
}

/// Decide what to do given what exists. No side effects.
pub fn plan(desired: &BucketSpec, actual: Option<&BucketHandle>) -> BucketPlan {
    match actual {
        None => BucketPlan::Create,
        Some(handle) if handle.is_owned_by(&desired.owner) => BucketPlan::Adopt(handle.clone()),
        Some(handle) => BucketPlan::Conflict {
            owner: handle.owner.clone(),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionAction {
    Created,
    Adopted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub handle: BucketHandle,
    pub action: ProvisionAction,
}

pub struct BucketProvisioner {
    store: Arc<dyn ObjectStore>,
    owner: AccountId,
    // 同一プロセス内の並行 reconcile を直列化する（create 呼び出しは高々 1 回）
    in_flight: Mutex<()>,
}

impl BucketProvisioner {
    pub fn new(store: Arc<dyn ObjectStore>, owner: AccountId) -> Self {
        Self {
            store,
            owner,
            in_flight: Mutex::new(()),
        }
    }

    /// Ensure the bucket exists and return a handle to it.
    ///
    /// "Already exists" (owned by us) is a success path.
    pub async fn ensure_bucket(&self, name: &BucketName) -> Result<BucketHandle, ProvisionError> {
        Ok(self.reconcile(name).await?.handle)
    }

    #[tracing::instrument(level = "info", skip(self), fields(bucket = %name, owner = %self.owner))]
    pub async fn reconcile(&self, name: &BucketName) -> Result<Reconciled, ProvisionError> {
        let _guard = self.in_flight.lock().await;
        let desired = BucketSpec {
            name: name.clone(),
            owner: self.owner.clone(),
        };

        let actual = self.describe(name).await?;
        match plan(&desired, actual.as_ref()) {
            BucketPlan::Adopt(handle) => {
                tracing::info!("bucket already present; nothing to create");
                Ok(Reconciled {
                    handle,
                    action: ProvisionAction::Adopted,
                })
            }
            BucketPlan::Conflict { owner } => Err(ProvisionError::OwnedElsewhere {
                bucket: name.clone(),
                owner,
            }),
            BucketPlan::Create => self.create(&desired).await,
        }
    }

    async fn describe(&self, name: &BucketName) -> Result<Option<BucketHandle>, ProvisionError> {
        self.store
            .describe_bucket(name)
            .await
            .map_err(|source| ProvisionError::Describe {
                bucket: name.clone(),
                source,
            })
    }

    async fn create(&self, desired: &BucketSpec) -> Result<Reconciled, ProvisionError> {
        match self.store.create_bucket(&desired.name, &desired.owner).await {
            Ok(handle) => {
                tracing::info!("bucket created");
                Ok(Reconciled {
                    handle,
                    action: ProvisionAction::Created,
                })
            }
            Err(StorageError::BucketAlreadyExists { owner, .. }) if owner == desired.owner => {
                // 別プロセスの同一アカウントに先を越された: 既存を採用する
                tracing::info!("bucket created concurrently by the same owner; adopting");
                match self.describe(&desired.name).await? {
                    Some(handle) => Ok(Reconciled {
                        handle,
                        action: ProvisionAction::Adopted,
                    }),
                    None => Err(ProvisionError::Create {
                        bucket: desired.name.clone(),
                        source: StorageError::NoSuchBucket(desired.name.clone()),
                    }),
                }
            }
            Err(StorageError::BucketAlreadyExists { owner, .. }) => {
                Err(ProvisionError::OwnedElsewhere {
                    bucket: desired.name.clone(),
                    owner,
                })
            }
            Err(source) => {
                tracing::error!(error = %source, "bucket creation failed");
                Err(ProvisionError::Create {
                    bucket: desired.name.clone(),
                    source,
                })
            }
        }
    }
}
