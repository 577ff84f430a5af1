//! Invocation log: the most recent records the compute host produced, in order.
//!
//! 保持するレコード数は上限付き（古いものから捨てる）。集計は捨てたレコードも
//! 含めて関数ごとに数え続けます。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use crate::domain::{FunctionName, InvocationRecord, OutcomeKind};
use crate::observability::InvocationCounts;

/// Records retained when no capacity is configured.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

#[derive(Default)]
struct LogState {
    records: VecDeque<InvocationRecord>,
    counts: HashMap<FunctionName, InvocationCounts>,
}

pub struct InvocationLog {
    state: Mutex<LogState>,
    capacity: usize,
    appended: Notify,
}

impl Default for InvocationLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl InvocationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A capacity of 0 is treated as 1.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LogState::default()),
            capacity: capacity.max(1),
            appended: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, record: InvocationRecord) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let counts = state.counts.entry(record.function.clone()).or_default();
            match record.outcome.kind {
                OutcomeKind::Succeeded => counts.succeeded += 1,
                OutcomeKind::Failed => counts.failed += 1,
                OutcomeKind::TimedOut => counts.timed_out += 1,
            }
            if record.outcome.access_denied {
                counts.access_denied += 1;
            }

            if state.records.len() == self.capacity {
                state.records.pop_front();
            }
            state.records.push_back(record);
        }
        self.appended.notify_waiters();
    }

    /// Retained records, oldest first.
    pub fn records(&self) -> Vec<InvocationRecord> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .records
            .iter()
            .cloned()
            .collect()
    }

    pub fn for_function(&self, function: &FunctionName) -> Vec<InvocationRecord> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .records
            .iter()
            .filter(|r| &r.function == function)
            .cloned()
            .collect()
    }

    /// Every finished invocation of `function`, evicted records included.
    pub fn counts(&self, function: &FunctionName) -> InvocationCounts {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .counts
            .get(function)
            .cloned()
            .unwrap_or_default()
    }

    /// Wait until `function` has at least `n` finished invocations.
    /// Returns `false` on timeout.
    pub async fn wait_for(&self, function: &FunctionName, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.counts(function).total() >= n {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }
}
