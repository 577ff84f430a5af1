//! Schedule: a cron expression bound to the function it fires.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ValidationError;
use super::function::FunctionName;

/// Cron expression in minute/hour form (all times UTC).
///
/// Unset fields default to `*`, so `CronExpr::daily_at("0", "12")` fires
/// every day at 12:00.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronExpr {
    pub minute: String,
    pub hour: String,
    #[serde(default = "any")]
    pub day_of_month: String,
    #[serde(default = "any")]
    pub month: String,
    #[serde(default = "any")]
    pub day_of_week: String,
}

fn any() -> String {
    "*".to_string()
}

impl CronExpr {
    pub fn daily_at(minute: impl Into<String>, hour: impl Into<String>) -> Self {
        Self {
            minute: minute.into(),
            hour: hour.into(),
            day_of_month: any(),
            month: any(),
            day_of_week: any(),
        }
    }

    /// Six-field form (seconds pinned to 0).
    pub fn expression(&self) -> String {
        format!(
            "0 {} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month, self.day_of_week
        )
    }

    pub fn compile(&self) -> Result<cron::Schedule, ValidationError> {
        let expr = self.expression();
        cron::Schedule::from_str(&expr).map_err(|e| ValidationError::InvalidCron {
            expr,
            reason: e.to_string(),
        })
    }

    /// First fire strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ValidationError> {
        Ok(self.compile()?.after(after).next())
    }
}

/// Declared time trigger. Immutable once deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub name: String,
    pub cron: CronExpr,
    pub target: FunctionName,
}
