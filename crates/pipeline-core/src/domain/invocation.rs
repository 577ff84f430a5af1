//! Invocation records: one entry per execution of a stage function.
//!
//! Shape of results only; no assumptions about who triggered or stored them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::function::FunctionName;
use super::ids::{EventId, InvocationId, ScheduleId, SubscriptionId};

/// What caused an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Schedule {
        schedule: ScheduleId,
    },
    Notification {
        subscription: SubscriptionId,
        event: EventId,
    },
    Http {
        method: String,
        path: String,
    },
    Direct,
}

/// Serialized as SUCCEEDED / FAILED / TIMED_OUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Succeeded,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationOutcome {
    pub kind: OutcomeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Set when a storage call inside the stage was refused.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub access_denied: bool,
}

impl InvocationOutcome {
    pub fn succeeded(response: serde_json::Value) -> Self {
        Self {
            kind: OutcomeKind::Succeeded,
            response: Some(response),
            reason: None,
            access_denied: false,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failed,
            response: None,
            reason: Some(reason.into()),
            access_denied: false,
        }
    }

    pub fn timed_out(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::TimedOut,
            response: None,
            reason: Some(reason.into()),
            access_denied: false,
        }
    }

    pub fn with_access_denied(mut self) -> Self {
        self.access_denied = true;
        self
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Succeeded
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub id: InvocationId,
    pub function: FunctionName,
    pub trigger: Trigger,
    pub payload: serde_json::Value,

    /// 1 for the first delivery; redeliveries count up.
    pub attempt: u32,

    pub outcome: InvocationOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
