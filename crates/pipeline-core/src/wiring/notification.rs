//! EventRouter - オブジェクト作成通知を関数へ配送する
//!
//! # 設計
//! - (bucket, prefix) ごとに購読は高々 1 つ
//!   - 同じ target で再 bind → 既存の Subscription を返す
//!   - 別の target で bind → `SubscriptionConflict`
//! - 配送は at-least-once。失敗した invocation は `RetryPolicy` に従って再配送する
//!   （これはプラットフォーム側の仕組みで、オーケストレーション層は再試行しない）
//! - 1 イベント = 1 task。遅い invocation が後続イベントを止めない

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use super::WiringError;
use crate::domain::{
    BucketName, FunctionName, KeyPrefix, ObjectCreated, Subscription, SubscriptionSpec, Trigger,
};
use crate::platform::{ComputeHost, RetryPolicy};
use crate::ports::{Clock, IdGenerator, ObjectEventStream, ObjectStore};

struct ActiveBinding {
    subscription: Subscription,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct EventRouter {
    store: Arc<dyn ObjectStore>,
    host: Arc<ComputeHost>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry: RetryPolicy,
    bindings: Mutex<HashMap<(BucketName, KeyPrefix), ActiveBinding>>,
}

impl EventRouter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        host: Arc<ComputeHost>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            host,
            clock,
            ids,
            retry,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe `target` to creations under `prefix` in `bucket`.
    #[tracing::instrument(level = "info", skip(self), fields(bucket = %bucket, prefix = %prefix, target = %target))]
    pub async fn bind_notification(
        &self,
        bucket: &BucketName,
        prefix: &KeyPrefix,
        target: &FunctionName,
    ) -> Result<Subscription, WiringError> {
        let mut bindings = self.bindings.lock().await;
        let pair = (bucket.clone(), prefix.clone());

        if let Some(active) = bindings.get(&pair) {
            let existing = &active.subscription;
            if &existing.spec.target == target {
                tracing::info!(subscription = %existing.id, "subscription already bound");
                return Ok(existing.clone());
            }
            return Err(WiringError::SubscriptionConflict {
                bucket: bucket.clone(),
                prefix: prefix.clone(),
                existing: existing.spec.target.clone(),
                requested: target.clone(),
            });
        }

        if self.host.spec(target).is_none() {
            return Err(WiringError::FunctionNotDeployed(target.clone()));
        }

        let events = self.store.on_create(bucket, prefix).await?;
        let subscription = Subscription {
            id: self.ids.generate_subscription_id(),
            spec: SubscriptionSpec {
                bucket: bucket.clone(),
                prefix: prefix.clone(),
                target: target.clone(),
            },
            created_at: self.clock.now(),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(dispatch_loop(
            subscription.clone(),
            events,
            Arc::clone(&self.host),
            self.retry.clone(),
            shutdown_rx,
        ));
        tracing::info!(subscription = %subscription.id, "subscription bound");

        bindings.insert(
            pair,
            ActiveBinding {
                subscription: subscription.clone(),
                shutdown_tx,
                join,
            },
        );
        Ok(subscription)
    }

    /// Stop routing events for the pair. Deliveries already started finish.
    pub async fn unbind(&self, bucket: &BucketName, prefix: &KeyPrefix) -> Option<Subscription> {
        let active = self
            .bindings
            .lock()
            .await
            .remove(&(bucket.clone(), prefix.clone()))?;
        Some(stop(active).await)
    }

    pub async fn unbind_all(&self) -> Vec<Subscription> {
        let drained: Vec<ActiveBinding> = self
            .bindings
            .lock()
            .await
            .drain()
            .map(|(_, active)| active)
            .collect();

        let mut stopped = Vec::with_capacity(drained.len());
        for active in drained {
            stopped.push(stop(active).await);
        }
        stopped
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .bindings
            .lock()
            .await
            .values()
            .map(|a| a.subscription.clone())
            .collect();
        subs.sort_by_key(|s| s.id);
        subs
    }
}

async fn stop(active: ActiveBinding) -> Subscription {
    let _ = active.shutdown_tx.send(true);
    let _ = active.join.await;
    tracing::info!(subscription = %active.subscription.id, "subscription unbound");
    active.subscription
}

async fn dispatch_loop(
    subscription: Subscription,
    mut events: ObjectEventStream,
    host: Arc<ComputeHost>,
    retry: RetryPolicy,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        dispatch(&subscription, event, &host, &retry);
    }

    // unbind 前に届いていたイベントは捨てずに配送する
    events.close();
    let mut drained = 0usize;
    while let Ok(event) = events.try_recv() {
        dispatch(&subscription, event, &host, &retry);
        drained += 1;
    }
    if drained > 0 {
        tracing::info!(subscription = %subscription.id, drained, "buffered events delivered after unbind");
    }
}

fn dispatch(
    subscription: &Subscription,
    event: ObjectCreated,
    host: &Arc<ComputeHost>,
    retry: &RetryPolicy,
) {
    // store 側でも絞っているが、prefix 外の key は絶対に配送しない
    if !subscription.matches(&event.bucket, &event.key) {
        tracing::warn!(subscription = %subscription.id, key = %event.key, "event outside prefix dropped");
        return;
    }

    tokio::spawn(deliver(
        Arc::clone(host),
        subscription.clone(),
        event,
        retry.clone(),
    ));
}

async fn deliver(
    host: Arc<ComputeHost>,
    subscription: Subscription,
    event: ObjectCreated,
    retry: RetryPolicy,
) {
    let target = &subscription.spec.target;
    let payload = match serde_json::to_value(&event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(event = %event.event_id, error = %e, "event could not be encoded");
            return;
        }
    };
    let trigger = Trigger::Notification {
        subscription: subscription.id,
        event: event.event_id,
    };

    let mut attempt = 1;
    loop {
        let record = match host.invoke(target, trigger.clone(), payload.clone(), attempt).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(event = %event.event_id, key = %event.key, error = %e, "event dropped");
                return;
            }
        };
        if record.outcome.is_success() {
            return;
        }
        if !retry.should_retry(attempt) {
            tracing::error!(
                event = %event.event_id,
                key = %event.key,
                attempts = attempt,
                "delivery attempts exhausted"
            );
            return;
        }

        let delay = retry.next_delay(attempt);
        tracing::warn!(
            event = %event.event_id,
            key = %event.key,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "invocation did not succeed; redelivering"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
