// ── Pilot Engine: Human Pacing ─────────────────────────────────────────────
//
// Bounded random delays that make the account's timing look typed by hand:
// between actions of one batch, and while "typing" before a send.
// A (0, 0) range disables the delay.

use crate::atoms::constants::{BETWEEN_ACTIONS_MS, TYPING_CHANNEL_MS, TYPING_DM_MS};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Inclusive millisecond range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn zero() -> Self {
        Self { min_ms: 0, max_ms: 0 }
    }

    /// Draw a delay. Kept synchronous so the thread-local RNG never lives
    /// across an await point.
    pub fn sample(&self) -> Duration {
        let (lo, hi) = if self.min_ms <= self.max_ms {
            (self.min_ms, self.max_ms)
        } else {
            (self.max_ms, self.min_ms)
        };
        if hi == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

impl From<(u64, u64)> for DelayRange {
    fn from((min_ms, max_ms): (u64, u64)) -> Self {
        Self { min_ms, max_ms }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pacer {
    pub between_actions: DelayRange,
    pub typing_channel: DelayRange,
    pub typing_dm: DelayRange,
}

impl Default for Pacer {
    fn default() -> Self {
        Self {
            between_actions: BETWEEN_ACTIONS_MS.into(),
            typing_channel: TYPING_CHANNEL_MS.into(),
            typing_dm: TYPING_DM_MS.into(),
        }
    }
}

impl Pacer {
    /// No delays at all.
    pub fn instant() -> Self {
        Self {
            between_actions: DelayRange::zero(),
            typing_channel: DelayRange::zero(),
            typing_dm: DelayRange::zero(),
        }
    }

    pub async fn between_actions(&self) {
        sleep_for(self.between_actions.sample()).await;
    }

    pub async fn typing(&self, direct: bool) {
        let range = if direct { self.typing_dm } else { self.typing_channel };
        sleep_for(range.sample()).await;
    }
}

async fn sleep_for(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}
