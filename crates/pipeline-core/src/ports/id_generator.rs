//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（Clock の時刻を timestamp 部に使う）

use ulid::Ulid;

use crate::domain::ids::{EventId, Id, IdMarker, InvocationId, ScheduleId, SubscriptionId};
use crate::ports::Clock;

/// # Thread Safety
/// - `Send + Sync` を要求（トリガーごとの task から並行に呼ばれる）
pub trait IdGenerator: Send + Sync {
    fn generate_invocation_id(&self) -> InvocationId;

    fn generate_subscription_id(&self) -> SubscriptionId;

    fn generate_schedule_id(&self) -> ScheduleId;

    fn generate_event_id(&self) -> EventId;
}

pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next<T: IdMarker>(&self) -> Id<T> {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Id::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_invocation_id(&self) -> InvocationId {
        self.next()
    }

    fn generate_subscription_id(&self) -> SubscriptionId {
        self.next()
    }

    fn generate_schedule_id(&self) -> ScheduleId {
        self.next()
    }

    fn generate_event_id(&self) -> EventId {
        self.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_invocation_id();
        let id2 = id_gen.generate_invocation_id();

        assert_ne!(id1, id2);
    }

    #[test]
    fn timestamp_part_comes_from_the_clock() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_event_id();
        let id2 = id_gen.generate_event_id();

        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
