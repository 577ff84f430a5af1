//! Stage port - 各ステージ（extract / transform）のハンドラ定義
//!
//! ハンドラは `InvocationContext` 経由でのみバケットにアクセスします。
//! コンテキストは関数の実行ロールで store を呼ぶため、grant がなければ
//! ストレージ境界で `AccessDenied` になります（配線時には検出しない）。

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{
    BUCKET_ENV, BucketName, FunctionName, InvocationId, ObjectKey, Principal, StageEnv,
    StoredObject, ValidationError, WritePrecondition, WriteResult,
};
use crate::ports::object_store::{ObjectStore, StorageError};
use crate::ports::weather_source::SourceError;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("encode/decode: {0}")]
    Codec(String),
}

impl StageError {
    pub fn is_access_denied(&self) -> bool {
        matches!(self, StageError::Storage(e) if e.is_access_denied())
    }
}

/// Everything one invocation may touch.
pub struct InvocationContext {
    pub invocation_id: InvocationId,
    pub function: FunctionName,
    pub principal: Principal,
    pub env: StageEnv,
    pub started_at: DateTime<Utc>,
    store: Arc<dyn ObjectStore>,
}

impl InvocationContext {
    pub fn new(
        invocation_id: InvocationId,
        function: FunctionName,
        principal: Principal,
        env: StageEnv,
        started_at: DateTime<Utc>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            invocation_id,
            function,
            principal,
            env,
            started_at,
            store,
        }
    }

    /// Bucket injected at provisioning time through `s3_upload_bucket`.
    pub fn bucket(&self) -> Result<BucketName, StageError> {
        let raw = self
            .env
            .get(BUCKET_ENV)
            .ok_or(StageError::MissingEnv(BUCKET_ENV))?;
        Ok(BucketName::parse(raw)?)
    }

    pub async fn put(
        &self,
        key: &ObjectKey,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult, StageError> {
        let bucket = self.bucket()?;
        Ok(self
            .store
            .put(&self.principal, &bucket, key, data, precondition)
            .await?)
    }

    pub async fn get(&self, key: &ObjectKey) -> Result<StoredObject, StageError> {
        let bucket = self.bucket()?;
        Ok(self.store.get(&self.principal, &bucket, key).await?)
    }
}

/// A stage's business logic.
///
/// `payload` has no enforced shape: scheduled fires send `{}`, notifications
/// send an `ObjectCreated`, HTTP callers send whatever they like.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &InvocationContext,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, StageError>;
}
