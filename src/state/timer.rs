//! Timer entity and its wall-clock derived values

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest run a timer may hold, create and extend included (one year)
pub const MAX_DURATION_MS: u64 = 366 * 24 * 60 * 60 * 1000;

/// Opaque timer identifier, also used as the notification key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(String);

impl TimerId {
    /// Generate a fresh, never reused id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TimerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TimerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    Running,
    Paused,
    Done,
}

impl TimerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerStatus::Running => "running",
            TimerStatus::Paused => "paused",
            TimerStatus::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(TimerStatus::Running),
            "paused" => Some(TimerStatus::Paused),
            "done" => Some(TimerStatus::Done),
            _ => None,
        }
    }
}

/// One user-created countdown.
///
/// Remaining time is never stored as a countdown. While running it is
/// derived from `start_timestamp` and `total_duration_ms`, so missed ticks
/// and suspended processes cannot make it drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    pub id: TimerId,
    pub title: String,
    /// Length the current run is measured against
    pub total_duration_ms: u64,
    /// Frozen remaining time while not running
    pub remaining_on_pause_ms: u64,
    /// Set if and only if `state` is running
    pub start_timestamp: Option<DateTime<Utc>>,
    pub state: TimerStatus,
    pub linked_step_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Timer {}

impl Timer {
    /// Create a paused timer holding the full duration
    pub fn new(
        title: impl Into<String>,
        duration_ms: u64,
        linked_step_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TimerId::generate(),
            title: title.into(),
            total_duration_ms: duration_ms,
            remaining_on_pause_ms: duration_ms,
            start_timestamp: None,
            state: TimerStatus::Paused,
            linked_step_id,
            created_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == TimerStatus::Running
    }

    pub fn is_done(&self) -> bool {
        self.state == TimerStatus::Done
    }

    /// Remaining milliseconds at `now`
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> u64 {
        match self.state {
            TimerStatus::Running => {
                let elapsed = self.elapsed_ms(now);
                self.total_duration_ms.saturating_sub(elapsed)
            }
            TimerStatus::Paused => self.remaining_on_pause_ms,
            TimerStatus::Done => 0,
        }
    }

    /// Remaining time at `now`
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        std::time::Duration::from_millis(self.remaining_ms(now))
    }

    /// Remaining whole seconds, rounded up so a display never shows 0 early
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        self.remaining_ms(now).div_ceil(1000)
    }

    /// Completed fraction of the current run in `[0, 1]`
    pub fn progress(&self, now: DateTime<Utc>) -> f64 {
        if self.total_duration_ms == 0 {
            return 0.0;
        }
        let remaining = self.remaining_ms(now) as f64;
        let ratio = 1.0 - remaining / self.total_duration_ms as f64;
        ratio.clamp(0.0, 1.0)
    }

    /// Wall-clock instant the current run ends, if running
    pub fn fire_at(&self) -> Option<DateTime<Utc>> {
        let start = self.start_timestamp?;
        if self.state != TimerStatus::Running {
            return None;
        }
        start.checked_add_signed(millis(self.total_duration_ms))
    }

    /// Length `extend` would grow: the run length while running, the frozen
    /// remaining time while paused. Zero once done.
    pub fn run_length_ms(&self) -> u64 {
        match self.state {
            TimerStatus::Running => self.total_duration_ms,
            TimerStatus::Paused => self.remaining_on_pause_ms,
            TimerStatus::Done => 0,
        }
    }

    /// Running and out of time at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_running() && self.remaining_ms(now) == 0
    }

    /// Paused -> running. Returns false when nothing changed.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != TimerStatus::Paused {
            return false;
        }
        self.total_duration_ms = self.remaining_on_pause_ms;
        self.start_timestamp = Some(now);
        self.state = TimerStatus::Running;
        true
    }

    /// Running -> paused, freezing the remaining time at `now`
    pub fn pause(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != TimerStatus::Running {
            return false;
        }
        self.remaining_on_pause_ms = self.remaining_ms(now);
        self.start_timestamp = None;
        self.state = TimerStatus::Paused;
        true
    }

    /// Add time to a running or paused timer
    pub fn extend(&mut self, by_ms: u64) -> bool {
        match self.state {
            TimerStatus::Running => {
                self.total_duration_ms = self.total_duration_ms.saturating_add(by_ms);
                true
            }
            TimerStatus::Paused => {
                self.remaining_on_pause_ms = self.remaining_on_pause_ms.saturating_add(by_ms);
                true
            }
            TimerStatus::Done => false,
        }
    }

    /// Running -> done
    pub fn complete(&mut self) -> bool {
        if self.state != TimerStatus::Running {
            return false;
        }
        self.start_timestamp = None;
        self.remaining_on_pause_ms = 0;
        self.state = TimerStatus::Done;
        true
    }

    // A clock set backwards must not push remaining above the run length.
    fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        match self.start_timestamp {
            Some(start) => (now - start).num_milliseconds().max(0) as u64,
            None => 0,
        }
    }
}

pub(crate) fn millis(ms: u64) -> Duration {
    i64::try_from(ms)
        .ok()
        .and_then(Duration::try_milliseconds)
        .unwrap_or(Duration::MAX)
}
