//! InMemoryObjectStore - 開発・テスト用のオブジェクトストレージ
//!
//! # 学習ポイント
//! - create-if-absent をロック内の 1 回の判定で行う（check と create の間に隙間がない）
//! - 書き込み確定後に prefix が一致する購読者へ通知を送る
//! - 全操作を `StorageOp` として記録し、テストで「create が何回呼ばれたか」を検証できる

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::domain::{
    AccountId, BucketHandle, BucketName, KeyPrefix, ObjectCreated, ObjectKey, PermissionGrant,
    Principal, Right, StoredObject, WritePrecondition, WriteResult,
};
use crate::ports::{Clock, IdGenerator, ObjectEventStream, ObjectStore, StorageError};

/// Record of a storage call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    DescribeBucket { bucket: BucketName },
    CreateBucket { bucket: BucketName },
    Grant { principal: Principal, bucket: BucketName },
    Put { principal: Principal, bucket: BucketName, key: ObjectKey },
    Get { principal: Principal, bucket: BucketName, key: ObjectKey },
    Subscribe { bucket: BucketName, prefix: KeyPrefix },
}

struct BucketState {
    handle: BucketHandle,
    objects: BTreeMap<ObjectKey, StoredObject>,
}

struct Subscriber {
    bucket: BucketName,
    prefix: KeyPrefix,
    tx: mpsc::UnboundedSender<ObjectCreated>,
}

#[derive(Default)]
struct StoreState {
    buckets: HashMap<BucketName, BucketState>,
    grants: Vec<PermissionGrant>,
    subscribers: Vec<Subscriber>,
    ops: Vec<StorageOp>,
    bucket_quota: Option<usize>,
    fail_creates: bool,
}

impl StoreState {
    fn check(
        &self,
        principal: &Principal,
        bucket: &BucketName,
        right: Right,
    ) -> Result<(), StorageError> {
        if !self.buckets.contains_key(bucket) {
            return Err(StorageError::NoSuchBucket(bucket.clone()));
        }
        if self.grants.iter().any(|g| g.allows(principal, bucket, right)) {
            Ok(())
        } else {
            Err(StorageError::AccessDenied {
                principal: principal.clone(),
                bucket: bucket.clone(),
                right,
            })
        }
    }
}

/// In-memory object store with grant enforcement and creation notifications.
///
/// Thread-safe via `Mutex`; no lock is held across an `.await`.
#[derive(Clone)]
pub struct InMemoryObjectStore {
    state: Arc<Mutex<StoreState>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryObjectStore {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            clock,
            ids,
        }
    }

    /// Limit the number of buckets this store will hold.
    pub fn with_bucket_quota(self, limit: usize) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.bucket_quota = Some(limit);
        }
        self
    }

    /// Make every subsequent `create_bucket` fail with a backend error.
    pub fn fail_bucket_creation(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_creates = fail;
        }
    }

    /// Pre-populate a bucket owned by someone else.
    pub fn insert_foreign_bucket(&self, name: BucketName, owner: AccountId) {
        if let Ok(mut state) = self.state.lock() {
            let handle = BucketHandle {
                name: name.clone(),
                owner,
                created_at: self.clock.now(),
            };
            state.buckets.insert(
                name,
                BucketState {
                    handle,
                    objects: BTreeMap::new(),
                },
            );
        }
    }

    pub fn ops(&self) -> Vec<StorageOp> {
        self.state.lock().map(|s| s.ops.clone()).unwrap_or_default()
    }

    pub fn create_calls(&self, bucket: &BucketName) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, StorageOp::CreateBucket { bucket: b } if b == bucket))
            .count()
    }

    pub fn bucket_count(&self) -> usize {
        self.state.lock().map(|s| s.buckets.len()).unwrap_or_default()
    }

    /// Keys in a bucket, bypassing grants.
    pub fn keys(&self, bucket: &BucketName) -> Vec<ObjectKey> {
        self.state
            .lock()
            .ok()
            .and_then(|s| {
                s.buckets
                    .get(bucket)
                    .map(|b| b.objects.keys().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Read an object, bypassing grants.
    pub fn peek(&self, bucket: &BucketName, key: &ObjectKey) -> Option<StoredObject> {
        let state = self.state.lock().ok()?;
        state.buckets.get(bucket)?.objects.get(key).cloned()
    }

    pub fn grants(&self) -> Vec<PermissionGrant> {
        self.state.lock().map(|s| s.grants.clone()).unwrap_or_default()
    }

    /// Re-send a creation event for an existing object, the way a real
    /// notification facility occasionally does.
    pub fn redeliver(&self, bucket: &BucketName, key: &ObjectKey) -> Result<usize, StorageError> {
        let mut state = self.lock()?;
        let object = state
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .cloned()
            .ok_or_else(|| StorageError::NoSuchKey {
                bucket: bucket.clone(),
                key: key.clone(),
            })?;
        Ok(self.notify(&mut state, bucket, &object))
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Backend("store lock poisoned".to_string()))
    }

    fn notify(&self, state: &mut StoreState, bucket: &BucketName, object: &StoredObject) -> usize {
        // 閉じた購読（unbind 済み）はここで掃除する
        state.subscribers.retain(|s| !s.tx.is_closed());

        let mut sent = 0;
        for sub in state
            .subscribers
            .iter()
            .filter(|s| &s.bucket == bucket && s.prefix.matches(&object.key))
        {
            let event = ObjectCreated {
                event_id: self.ids.generate_event_id(),
                bucket: bucket.clone(),
                key: object.key.clone(),
                size: object.data.len() as u64,
                created_at: object.created_at,
            };
            if sub.tx.send(event).is_ok() {
                sent += 1;
            }
        }
        sent
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn describe_bucket(&self, name: &BucketName) -> Result<Option<BucketHandle>, StorageError> {
        let mut state = self.lock()?;
        state.ops.push(StorageOp::DescribeBucket {
            bucket: name.clone(),
        });
        Ok(state.buckets.get(name).map(|b| b.handle.clone()))
    }

    async fn create_bucket(
        &self,
        name: &BucketName,
        owner: &AccountId,
    ) -> Result<BucketHandle, StorageError> {
        let mut state = self.lock()?;
        state.ops.push(StorageOp::CreateBucket {
            bucket: name.clone(),
        });

        if state.fail_creates {
            return Err(StorageError::Backend(format!(
                "injected failure creating {name}"
            )));
        }
        if let Some(existing) = state.buckets.get(name) {
            return Err(StorageError::BucketAlreadyExists {
                bucket: name.clone(),
                owner: existing.handle.owner.clone(),
            });
        }
        if let Some(limit) = state.bucket_quota
            && state.buckets.len() >= limit
        {
            return Err(StorageError::QuotaExceeded { limit });
        }

        let handle = BucketHandle {
            name: name.clone(),
            owner: owner.clone(),
            created_at: self.clock.now(),
        };
        state.buckets.insert(
            name.clone(),
            BucketState {
                handle: handle.clone(),
                objects: BTreeMap::new(),
            },
        );
        Ok(handle)
    }

    async fn grant(&self, grant: &PermissionGrant) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state.ops.push(StorageOp::Grant {
            principal: grant.principal.clone(),
            bucket: grant.bucket.clone(),
        });
        if !state.buckets.contains_key(&grant.bucket) {
            return Err(StorageError::NoSuchBucket(grant.bucket.clone()));
        }

        if let Some(existing) = state
            .grants
            .iter_mut()
            .find(|g| g.principal == grant.principal && g.bucket == grant.bucket)
        {
            existing.rights = existing.rights.union(grant.rights);
        } else {
            state.grants.push(grant.clone());
        }
        Ok(())
    }

    async fn put(
        &self,
        caller: &Principal,
        bucket: &BucketName,
        key: &ObjectKey,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult, StorageError> {
        let mut state = self.lock()?;
        state.ops.push(StorageOp::Put {
            principal: caller.clone(),
            bucket: bucket.clone(),
            key: key.clone(),
        });
        state.check(caller, bucket, Right::Write)?;

        let created_at = self.clock.now();
        let object = StoredObject {
            key: key.clone(),
            data,
            created_at,
        };
        {
            let Some(bucket_state) = state.buckets.get_mut(bucket) else {
                return Err(StorageError::NoSuchBucket(bucket.clone()));
            };
            if precondition == WritePrecondition::DoesNotExist
                && bucket_state.objects.contains_key(key)
            {
                return Ok(WriteResult::PreconditionFailed);
            }
            bucket_state.objects.insert(key.clone(), object.clone());
        }

        // 書き込み確定後に通知
        self.notify(&mut state, bucket, &object);
        Ok(WriteResult::Created { created_at })
    }

    async fn get(
        &self,
        caller: &Principal,
        bucket: &BucketName,
        key: &ObjectKey,
    ) -> Result<StoredObject, StorageError> {
        let mut state = self.lock()?;
        state.ops.push(StorageOp::Get {
            principal: caller.clone(),
            bucket: bucket.clone(),
            key: key.clone(),
        });
        state.check(caller, bucket, Right::Read)?;

        state
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .cloned()
            .ok_or_else(|| StorageError::NoSuchKey {
                bucket: bucket.clone(),
                key: key.clone(),
            })
    }

    async fn on_create(
        &self,
        bucket: &BucketName,
        prefix: &KeyPrefix,
    ) -> Result<ObjectEventStream, StorageError> {
        let mut state = self.lock()?;
        state.ops.push(StorageOp::Subscribe {
            bucket: bucket.clone(),
            prefix: prefix.clone(),
        });
        if !state.buckets.contains_key(bucket) {
            return Err(StorageError::NoSuchBucket(bucket.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(Subscriber {
            bucket: bucket.clone(),
            prefix: prefix.clone(),
            tx,
        });
        Ok(rx)
    }
}
