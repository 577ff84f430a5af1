//! Schedule binding - cron で extract を起動する
//!
//! # 設計
//! - 発火ごとに `spawn_invoke` する（ループは invocation を待たない）
//! - 長い invocation は次の発火と重なってもよい
//! - `deregister` は以降の発火を止めるだけで、実行中の invocation は最後まで走る

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::WiringError;
use crate::domain::{ScheduleId, ScheduleSpec, Trigger};
use crate::platform::ComputeHost;
use crate::ports::{Clock, IdGenerator};

/// A live time trigger. Dropping it without `deregister` leaves it firing.
#[derive(Debug)]
pub struct ScheduleBinding {
    pub id: ScheduleId,
    pub spec: ScheduleSpec,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ScheduleBinding {
    /// Stop future fires and wait for the trigger loop to exit.
    pub async fn deregister(self) {
        // receiver may already be gone if the loop ended on its own
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
        tracing::info!(schedule = %self.id, name = %self.spec.name, "schedule deregistered");
    }
}

/// Register a time trigger that invokes `spec.target` with `{}` at each fire.
#[tracing::instrument(level = "info", skip_all, fields(name = %spec.name, cron = %spec.cron.expression(), target = %spec.target))]
pub fn bind_schedule(
    spec: ScheduleSpec,
    host: Arc<ComputeHost>,
    clock: Arc<dyn Clock>,
    ids: &dyn IdGenerator,
) -> Result<ScheduleBinding, WiringError> {
    let schedule = spec.cron.compile()?;
    if host.spec(&spec.target).is_none() {
        return Err(WiringError::FunctionNotDeployed(spec.target.clone()));
    }

    let id = ids.generate_schedule_id();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let join = tokio::spawn(trigger_loop(
        id,
        spec.clone(),
        schedule,
        host,
        clock,
        shutdown_rx,
    ));
    tracing::info!(schedule = %id, "schedule bound");

    Ok(ScheduleBinding {
        id,
        spec,
        shutdown_tx,
        join,
    })
}

async fn trigger_loop(
    id: ScheduleId,
    spec: ScheduleSpec,
    schedule: cron::Schedule,
    host: Arc<ComputeHost>,
    clock: Arc<dyn Clock>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut last_fired: Option<DateTime<Utc>> = None;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let now = clock.now();
        // 同じ発火時刻を二度使わない（時計が少し遅れて起きた場合）
        let after = match last_fired {
            Some(fired) if fired > now => fired,
            _ => now,
        };
        let Some(fire_at) = schedule.after(&after).next() else {
            tracing::warn!(schedule = %id, "cron expression has no future fire time; stopping");
            break;
        };
        let wait = (fire_at - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        last_fired = Some(fire_at);
        tracing::info!(schedule = %id, fire_at = %fire_at, target = %spec.target, "schedule fired");
        // 待たない: 次の発火と invocation が重なってもよい
        drop(host.spawn_invoke(
            spec.target.clone(),
            Trigger::Schedule { schedule: id },
            serde_json::json!({}),
        ));
    }
}
