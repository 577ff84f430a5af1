//! Deployment - スタックの適用と撤去
//!
//! # 適用順序
//! 1. bucket を reconcile（既存なら採用）
//! 2. 関数を登録（`s3_upload_bucket` 注入済み）
//! 3. grant を付与（購読より先）
//! 4. `raw/` の購読を bind
//! 5. スケジュールを bind
//! 6. HTTP ingress を bind → output `FunctionUrlValue`
//!
//! 途中で失敗したら、そこまでに bind したものを外してからエラーを返します。
//! 撤去時も bucket は残します。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::builder::PipelineApp;
use super::stack::StackPlan;
use crate::domain::{
    BucketHandle, BucketName, FunctionName, InvocationRecord, Principal, ScheduleId,
    Subscription, Trigger,
};
use crate::observability::InvocationCounts;
use crate::platform::{ComputeError, ComputeHost, InvocationLog};
use crate::ports::{Clock, IdGenerator, ObjectStore, StageHandler, StorageError};
use crate::provision::{BucketProvisioner, ProvisionAction, ProvisionError};
use crate::wiring::{
    EventRouter, HttpIngress, ScheduleBinding, WiringError, bind_http, bind_schedule,
};

/// Name of the output carrying the public HTTP URL.
pub const FUNCTION_URL_OUTPUT: &str = "FunctionUrlValue";

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("registering functions failed: {0}")]
    Compute(#[from] ComputeError),

    #[error("granting {principal} access to {bucket} failed: {source}")]
    Grant {
        principal: Principal,
        bucket: BucketName,
        #[source]
        source: StorageError,
    },

    #[error("wiring triggers failed: {0}")]
    Wiring(#[from] WiringError),
}

/// What `teardown` removed. The bucket is never among it.
#[derive(Debug, Clone, Serialize)]
pub struct TeardownReport {
    pub http_stopped: bool,
    pub schedule_deregistered: bool,
    pub subscriptions_removed: usize,
    pub functions_removed: Vec<FunctionName>,
    pub bucket_retained: BucketName,
    pub counts: BTreeMap<FunctionName, InvocationCounts>,
}

pub struct Deployment {
    plan: StackPlan,
    bucket: BucketHandle,
    provisioned: ProvisionAction,
    store: Arc<dyn ObjectStore>,
    host: Arc<ComputeHost>,
    router: EventRouter,
    functions: Vec<FunctionName>,
    subscription: Option<Subscription>,
    schedule: Option<ScheduleBinding>,
    http: Option<HttpIngress>,
    outputs: BTreeMap<String, String>,
}

impl Deployment {
    #[tracing::instrument(level = "info", skip_all, fields(bucket = %app.plan.bucket.name))]
    pub(crate) async fn apply(app: PipelineApp) -> Result<Self, DeployError> {
        let PipelineApp {
            plan,
            store,
            clock,
            ids,
            extract,
            transform,
        } = app;

        let provisioner = BucketProvisioner::new(Arc::clone(&store), plan.bucket.owner.clone());
        let reconciled = provisioner.reconcile(&plan.bucket.name).await?;

        let host = Arc::new(
            ComputeHost::new(Arc::clone(&store), Arc::clone(&clock), Arc::clone(&ids))
                .with_log_capacity(plan.invocation_log_capacity),
        );
        let router = EventRouter::new(
            Arc::clone(&store),
            Arc::clone(&host),
            Arc::clone(&clock),
            Arc::clone(&ids),
            plan.delivery.clone(),
        );

        let mut deployment = Self {
            plan,
            bucket: reconciled.handle,
            provisioned: reconciled.action,
            store,
            host,
            router,
            functions: Vec::new(),
            subscription: None,
            schedule: None,
            http: None,
            outputs: BTreeMap::new(),
        };

        if let Err(e) = deployment.wire(extract, transform, clock, ids.as_ref()).await {
            tracing::error!(error = %e, "deployment failed; removing what was bound");
            deployment.dismantle().await;
            return Err(e);
        }

        tracing::info!(
            provisioned = ?deployment.provisioned,
            outputs = ?deployment.outputs,
            "deployment complete"
        );
        Ok(deployment)
    }

    async fn wire(
        &mut self,
        extract: Arc<dyn StageHandler>,
        transform: Arc<dyn StageHandler>,
        clock: Arc<dyn Clock>,
        ids: &dyn IdGenerator,
    ) -> Result<(), DeployError> {
        for (spec, handler) in [
            (self.plan.extract.clone(), extract),
            (self.plan.transform.clone(), transform),
        ] {
            let name = spec.name.clone();
            self.host.register(spec, handler)?;
            self.functions.push(name);
        }

        // 購読より先に権限を付ける
        for grant in &self.plan.grants {
            self.store
                .grant(grant)
                .await
                .map_err(|source| DeployError::Grant {
                    principal: grant.principal.clone(),
                    bucket: grant.bucket.clone(),
                    source,
                })?;
            tracing::info!(principal = %grant.principal, rights = ?grant.rights, "grant applied");
        }

        let sub = &self.plan.subscription;
        let subscription = self
            .router
            .bind_notification(&sub.bucket, &sub.prefix, &sub.target)
            .await?;
        self.subscription = Some(subscription);

        let schedule = bind_schedule(self.plan.schedule.clone(), Arc::clone(&self.host), clock, ids)?;
        self.schedule = Some(schedule);

        if let Some(http) = &self.plan.http {
            let ingress = bind_http(http.listen, Arc::clone(&self.host), http.target.clone()).await?;
            self.outputs
                .insert(FUNCTION_URL_OUTPUT.to_string(), ingress.url.clone());
            self.http = Some(ingress);
        }
        Ok(())
    }

    pub fn plan(&self) -> &StackPlan {
        &self.plan
    }

    pub fn bucket(&self) -> &BucketHandle {
        &self.bucket
    }

    /// Whether this deployment created the bucket or adopted an existing one.
    pub fn provision_action(&self) -> ProvisionAction {
        self.provisioned
    }

    pub fn outputs(&self) -> &BTreeMap<String, String> {
        &self.outputs
    }

    pub fn function_url(&self) -> Option<&str> {
        self.outputs.get(FUNCTION_URL_OUTPUT).map(String::as_str)
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    pub fn schedule_id(&self) -> Option<ScheduleId> {
        self.schedule.as_ref().map(|s| s.id)
    }

    pub fn host(&self) -> &Arc<ComputeHost> {
        &self.host
    }

    pub fn log(&self) -> Arc<InvocationLog> {
        self.host.log()
    }

    pub fn counts(&self) -> BTreeMap<FunctionName, InvocationCounts> {
        let log = self.host.log();
        [&self.plan.extract.name, &self.plan.transform.name]
            .into_iter()
            .map(|name| (name.clone(), log.counts(name)))
            .collect()
    }

    /// Invoke a deployed function outside of its triggers.
    pub async fn invoke(
        &self,
        function: &FunctionName,
        payload: serde_json::Value,
    ) -> Result<InvocationRecord, ComputeError> {
        self.host.invoke(function, Trigger::Direct, payload, 1).await
    }

    /// Remove triggers and functions. The bucket and its objects stay.
    pub async fn teardown(mut self) -> TeardownReport {
        self.dismantle().await
    }

    async fn dismantle(&mut self) -> TeardownReport {
        let counts = self.counts();

        let http_stopped = match self.http.take() {
            Some(ingress) => {
                ingress.shutdown().await;
                true
            }
            None => false,
        };
        let schedule_deregistered = match self.schedule.take() {
            Some(schedule) => {
                schedule.deregister().await;
                true
            }
            None => false,
        };
        let subscriptions_removed = self.router.unbind_all().await.len();
        self.subscription = None;

        let mut functions_removed = Vec::new();
        for name in self.functions.drain(..) {
            if self.host.deregister(&name) {
                functions_removed.push(name);
            }
        }
        self.outputs.clear();

        tracing::info!(bucket = %self.bucket.name, "teardown complete; bucket retained");
        TeardownReport {
            http_stopped,
            schedule_deregistered,
            subscriptions_removed,
            functions_removed,
            bucket_retained: self.bucket.name.clone(),
            counts,
        }
    }
}
