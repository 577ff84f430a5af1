//! ComputeHost - 関数の登録と invocation 実行
//!
//! # 設計
//! - 登録はデプロイ時、実行は各トリガー（schedule / notification / HTTP）から
//! - 1 invocation = 1 tokio task。timeout を超えたら future を drop する
//!   （途中までの書き込みはロールバックしない）
//! - handler の panic も Failed として記録する

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tokio::task::JoinHandle;

use super::log::InvocationLog;
use crate::domain::{
    FunctionName, FunctionSpec, InvocationOutcome, InvocationRecord, OutcomeKind, Trigger,
};
use crate::ports::{Clock, IdGenerator, InvocationContext, ObjectStore, StageHandler};

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("function {0} is already deployed")]
    DuplicateFunction(FunctionName),

    #[error("function {0} is not deployed")]
    FunctionNotFound(FunctionName),
}

struct DeployedFunction {
    spec: FunctionSpec,
    handler: Arc<dyn StageHandler>,
}

pub struct ComputeHost {
    functions: RwLock<HashMap<FunctionName, Arc<DeployedFunction>>>,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    log: Arc<InvocationLog>,
}

impl ComputeHost {
    pub fn new(store: Arc<dyn ObjectStore>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            functions: RwLock::new(HashMap::new()),
            store,
            clock,
            ids,
            log: Arc::new(InvocationLog::new()),
        }
    }

    /// Keep at most `capacity` invocation records; counts stay exact.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log = Arc::new(InvocationLog::with_capacity(capacity));
        self
    }

    pub fn register(
        &self,
        spec: FunctionSpec,
        handler: Arc<dyn StageHandler>,
    ) -> Result<(), ComputeError> {
        let mut functions = self.functions.write().unwrap_or_else(|e| e.into_inner());
        if functions.contains_key(&spec.name) {
            return Err(ComputeError::DuplicateFunction(spec.name));
        }
        tracing::info!(
            function = %spec.name,
            memory_mb = spec.memory_mb,
            timeout_secs = spec.timeout.as_secs(),
            "function registered"
        );
        functions.insert(spec.name.clone(), Arc::new(DeployedFunction { spec, handler }));
        Ok(())
    }

    /// In-flight invocations keep running; only new ones are refused.
    pub fn deregister(&self, name: &FunctionName) -> bool {
        self.functions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }

    pub fn spec(&self, name: &FunctionName) -> Option<FunctionSpec> {
        self.lookup(name).ok().map(|f| f.spec.clone())
    }

    pub fn log(&self) -> Arc<InvocationLog> {
        Arc::clone(&self.log)
    }

    fn lookup(&self, name: &FunctionName) -> Result<Arc<DeployedFunction>, ComputeError> {
        self.functions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| ComputeError::FunctionNotFound(name.clone()))
    }

    /// Run one invocation to completion (or timeout) and record it.
    #[tracing::instrument(level = "debug", skip(self, name, trigger, payload), fields(function = %name))]
    pub async fn invoke(
        &self,
        name: &FunctionName,
        trigger: Trigger,
        payload: serde_json::Value,
        attempt: u32,
    ) -> Result<InvocationRecord, ComputeError> {
        let function = self.lookup(name)?;
        let id = self.ids.generate_invocation_id();
        let started_at = self.clock.now();
        let ctx = InvocationContext::new(
            id,
            name.clone(),
            function.spec.principal(),
            function.spec.environment.clone(),
            started_at,
            Arc::clone(&self.store),
        );

        let handler = Arc::clone(&function.handler);
        let timeout = function.spec.timeout;
        let input = payload.clone();
        let joined = tokio::spawn(async move {
            tokio::time::timeout(timeout, handler.handle(&ctx, input)).await
        })
        .await;

        let outcome = match joined {
            Ok(Ok(Ok(response))) => InvocationOutcome::succeeded(response),
            Ok(Ok(Err(err))) => {
                let outcome = InvocationOutcome::failed(err.to_string());
                if err.is_access_denied() {
                    outcome.with_access_denied()
                } else {
                    outcome
                }
            }
            Ok(Err(_elapsed)) => {
                InvocationOutcome::timed_out(format!("timed out after {}s", timeout.as_secs_f64()))
            }
            Err(join_err) => InvocationOutcome::failed(format!("invocation aborted: {join_err}")),
        };

        match outcome.kind {
            OutcomeKind::Succeeded => {
                tracing::info!(invocation = %id, attempt, "invocation succeeded")
            }
            OutcomeKind::Failed => tracing::error!(
                invocation = %id,
                attempt,
                access_denied = outcome.access_denied,
                reason = outcome.reason.as_deref().unwrap_or_default(),
                "invocation failed"
            ),
            OutcomeKind::TimedOut => tracing::error!(
                invocation = %id,
                attempt,
                reason = outcome.reason.as_deref().unwrap_or_default(),
                "invocation timed out; partial writes are kept"
            ),
        }

        let record = InvocationRecord {
            id,
            function: name.clone(),
            trigger,
            payload,
            attempt,
            outcome,
            started_at,
            finished_at: self.clock.now(),
        };
        self.log.append(record.clone());
        Ok(record)
    }

    /// Fire-and-forget invocation. The returned handle may be dropped.
    pub fn spawn_invoke(
        self: &Arc<Self>,
        name: FunctionName,
        trigger: Trigger,
        payload: serde_json::Value,
    ) -> JoinHandle<Result<InvocationRecord, ComputeError>> {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            let result = host.invoke(&name, trigger, payload, 1).await;
            if let Err(err) = &result {
                tracing::error!(function = %name, error = %err, "invocation could not start");
            }
            result
        })
    }
}
