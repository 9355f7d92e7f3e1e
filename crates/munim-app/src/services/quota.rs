//! Advisory accounting of outbound model calls.

use serde::Serialize;
use tracing::warn;

/// Monotonic count of dispatch attempts against an advisory daily budget.
/// The counter never blocks dispatch and never rolls over at a day boundary;
/// it clears only on process restart or an explicit operator reset.
#[derive(Debug)]
pub struct QuotaCounter {
    calls_made: u64,
    daily_limit: u64,
}

impl QuotaCounter {
    pub fn new(daily_limit: u64) -> Self {
        Self {
            calls_made: 0,
            daily_limit,
        }
    }

    /// Counts one dispatch attempt and returns the running total.
    pub fn record_call(&mut self) -> u64 {
        self.calls_made += 1;
        if self.calls_made == self.daily_limit.saturating_add(1) {
            warn!(
                calls = self.calls_made,
                limit = self.daily_limit,
                "daily call budget crossed, requests may start hitting provider quota errors"
            );
        }
        self.calls_made
    }

    pub fn calls_made(&self) -> u64 {
        self.calls_made
    }

    pub fn remaining(&self) -> u64 {
        self.daily_limit.saturating_sub(self.calls_made)
    }

    pub fn reset(&mut self) {
        self.calls_made = 0;
    }

    pub fn snapshot(&self) -> QuotaStatus {
        QuotaStatus {
            calls_made: self.calls_made,
            daily_limit: self.daily_limit,
            remaining: self.remaining(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QuotaStatus {
    pub calls_made: u64,
    pub daily_limit: u64,
    pub remaining: u64,
}
