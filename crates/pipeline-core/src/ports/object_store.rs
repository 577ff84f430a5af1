//! ObjectStore port - 永続オブジェクトストレージ（S3 / GCS / InMemory）
//!
//! # 設計原則
//! - バケット作成は create-if-absent（既存なら `BucketAlreadyExists`）
//! - データ操作（put / get）は呼び出し元の Principal で権限チェックされる
//! - オブジェクト作成通知は書き込み確定後に prefix 単位で配送（at-least-once）

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{
    AccountId, BucketHandle, BucketName, KeyPrefix, ObjectCreated, ObjectKey, PermissionGrant,
    Principal, Right, StoredObject, WritePrecondition, WriteResult,
};

/// Stream of creation notifications for one (bucket, prefix) subscription.
pub type ObjectEventStream = mpsc::UnboundedReceiver<ObjectCreated>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("bucket {bucket} already exists (owner: {owner})")]
    BucketAlreadyExists { bucket: BucketName, owner: AccountId },

    #[error("bucket {0} does not exist")]
    NoSuchBucket(BucketName),

    #[error("object {key} does not exist in bucket {bucket}")]
    NoSuchKey { bucket: BucketName, key: ObjectKey },

    #[error("access denied: {principal} has no {right} permission on bucket {bucket}")]
    AccessDenied {
        principal: Principal,
        bucket: BucketName,
        right: Right,
    },

    #[error("bucket quota exhausted (limit {limit})")]
    QuotaExceeded { limit: usize },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_access_denied(&self) -> bool {
        matches!(self, StorageError::AccessDenied { .. })
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns `None` when no bucket with that name exists.
    async fn describe_bucket(&self, name: &BucketName) -> Result<Option<BucketHandle>, StorageError>;

    async fn exists(&self, name: &BucketName) -> Result<bool, StorageError> {
        Ok(self.describe_bucket(name).await?.is_some())
    }

    /// Create-if-absent. Fails with `BucketAlreadyExists` when the name is taken.
    async fn create_bucket(
        &self,
        name: &BucketName,
        owner: &AccountId,
    ) -> Result<BucketHandle, StorageError>;

    /// Grants are additive; granting the same rights twice is a no-op.
    async fn grant(&self, grant: &PermissionGrant) -> Result<(), StorageError>;

    async fn put(
        &self,
        caller: &Principal,
        bucket: &BucketName,
        key: &ObjectKey,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult, StorageError>;

    async fn get(
        &self,
        caller: &Principal,
        bucket: &BucketName,
        key: &ObjectKey,
    ) -> Result<StoredObject, StorageError>;

    /// Subscribe to creations of keys under `prefix`. Events are sent only
    /// after the object is readable.
    async fn on_create(
        &self,
        bucket: &BucketName,
        prefix: &KeyPrefix,
    ) -> Result<ObjectEventStream, StorageError>;
}
