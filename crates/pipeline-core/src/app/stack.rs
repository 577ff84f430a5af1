//! StackPlan - 宣言されたスタック
//!
//! 設定から導出した「何を作るか」の一覧です。`synth` はこれを JSON で出力し、
//! `Deployment` はこの順序どおりに適用します。

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use super::deployment::FUNCTION_URL_OUTPUT;
use crate::config::ResolvedStack;
use crate::domain::{
    BUCKET_ENV, FunctionName, FunctionSpec, PermissionGrant, Rights, ScheduleSpec,
    SubscriptionSpec,
};
use crate::platform::RetryPolicy;
use crate::provision::BucketSpec;

const REDACTED: &str = "***";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpPlan {
    pub target: FunctionName,
    pub listen: SocketAddr,
    /// Always `"none"`: the URL is public.
    pub auth: String,
    pub cors_allowed_origins: Vec<String>,
    pub cors_allowed_methods: Vec<String>,
    pub cors_allowed_headers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackPlan {
    pub bucket: BucketSpec,
    /// The bucket outlives the stages.
    pub retain_bucket_on_teardown: bool,
    pub extract: FunctionSpec,
    pub transform: FunctionSpec,
    pub grants: Vec<PermissionGrant>,
    pub subscription: SubscriptionSpec,
    pub schedule: ScheduleSpec,
    pub http: Option<HttpPlan>,
    pub delivery: RetryPolicy,
    pub invocation_log_capacity: usize,
    pub outputs: Vec<String>,
}

impl StackPlan {
    pub fn from_stack(stack: &ResolvedStack) -> Self {
        let bucket_env = stack.bucket.as_str();
        let extract = stack.extract.clone().with_env(BUCKET_ENV, bucket_env);
        let transform = stack.transform.clone().with_env(BUCKET_ENV, bucket_env);

        let grants = vec![
            PermissionGrant {
                principal: extract.principal(),
                bucket: stack.bucket.clone(),
                rights: Rights::WRITE,
            },
            PermissionGrant {
                principal: transform.principal(),
                bucket: stack.bucket.clone(),
                rights: Rights::READ_WRITE,
            },
        ];

        let subscription = SubscriptionSpec {
            bucket: stack.bucket.clone(),
            prefix: stack.raw_prefix.clone(),
            target: transform.name.clone(),
        };

        let schedule = ScheduleSpec {
            name: format!("{}-daily", extract.name),
            cron: stack.schedule.clone(),
            target: extract.name.clone(),
        };

        let http = stack.http_listen.map(|listen| HttpPlan {
            target: extract.name.clone(),
            listen,
            auth: "none".to_string(),
            cors_allowed_origins: vec!["*".to_string()],
            cors_allowed_methods: vec!["*".to_string()],
            cors_allowed_headers: vec!["*".to_string()],
        });
        let outputs = if http.is_some() {
            vec![FUNCTION_URL_OUTPUT.to_string()]
        } else {
            Vec::new()
        };

        Self {
            bucket: BucketSpec {
                name: stack.bucket.clone(),
                owner: stack.owner.clone(),
            },
            retain_bucket_on_teardown: true,
            extract,
            transform,
            grants,
            subscription,
            schedule,
            http,
            delivery: stack.delivery.clone(),
            invocation_log_capacity: stack.invocation_log_capacity,
            outputs,
        }
    }

    /// Copy safe to print: environment values other than the bucket are masked.
    pub fn redacted(&self) -> Self {
        let mut plan = self.clone();
        for spec in [&mut plan.extract, &mut plan.transform] {
            let keys: Vec<String> = spec
                .environment
                .iter()
                .filter(|(k, _)| *k != BUCKET_ENV)
                .map(|(k, _)| k.to_string())
                .collect();
            for key in keys {
                spec.environment.insert(key, REDACTED);
            }
        }
        plan
    }
}
