use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use common::{AlertKey, PreCloseOffset};
use detector::Detection;

/// How long a state entry survives past its relevant timestamp.
pub fn state_retention() -> TimeDelta {
    TimeDelta::hours(24)
}

/// Per-key memory of what has already been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    /// Streak machine in COOLDOWN since `last_fired_at`. Absence of an entry is IDLE.
    Streak { last_fired_at: DateTime<Utc> },
    /// Pre-close machine NOTIFIED for `last_target_end`. Absence of an entry is ARMED.
    PreClose { last_target_end: DateTime<Utc> },
}

impl AlertState {
    fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AlertState::Streak { last_fired_at } => *last_fired_at,
            AlertState::PreClose { last_target_end } => *last_target_end,
        }
    }
}

/// Decides whether a detection becomes a notification, and remembers the
/// decision so repeated polls over overlapping history stay quiet.
///
/// The scheduler never fails: inputs are validated by the caller, and a
/// decision always mutates state before the caller attempts delivery, so a
/// failed send is not retried.
#[derive(Debug)]
pub struct AlertScheduler {
    cooldown: TimeDelta,
    states: HashMap<AlertKey, AlertState>,
}

impl AlertScheduler {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown: TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX),
            states: HashMap::new(),
        }
    }

    /// Streak-confirmed machine. Fires when the window matched, its last
    /// candle is complete, and the key is idle or its cooldown has elapsed.
    pub fn offer_streak(
        &mut self,
        key: &AlertKey,
        detection: &Detection,
        last_complete: bool,
        now: DateTime<Utc>,
    ) -> bool {
        if !detection.matched || !last_complete {
            return false;
        }

        if let Some(AlertState::Streak { last_fired_at }) = self.states.get(key) {
            if now - *last_fired_at < self.cooldown {
                debug!(key = %key, last_fired_at = %last_fired_at, "Streak alert in cooldown");
                return false;
            }
        }

        self.states
            .insert(key.clone(), AlertState::Streak { last_fired_at: now });
        true
    }

    /// Pre-close machine. Fires at most once per distinct `target_end` while
    /// the time left until `target_end` sits inside the offset's band.
    pub fn offer_pre_close(
        &mut self,
        key: &AlertKey,
        offset: &PreCloseOffset,
        target_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        let minutes_to_close = (target_end - now).num_milliseconds() as f64 / 60_000.0;
        if !offset.contains(minutes_to_close) {
            return false;
        }

        if let Some(AlertState::PreClose { last_target_end }) = self.states.get(key) {
            if *last_target_end == target_end {
                return false;
            }
        }

        self.states.insert(
            key.clone(),
            AlertState::PreClose { last_target_end: target_end },
        );
        true
    }

    /// Drop entries whose relevant timestamp is more than 24 hours before `now`.
    /// Returns how many were removed.
    pub fn collect_garbage(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.states.len();
        let retention = state_retention();
        self.states
            .retain(|_, state| now - state.timestamp() <= retention);
        before - self.states.len()
    }

    pub fn state(&self, key: &AlertKey) -> Option<&AlertState> {
        self.states.get(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
