//! Engine state: the persisted lock/transition record and the derived
//! snapshots handed to consumers.
//!
//! [`EngineState`] is the single persisted source of truth for "is the
//! current session locked, and is a switch pending". [`TimerState`],
//! [`LockStatus`] and [`TransitionStatus`] are recomputed views and are
//! never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted lock and transition flags.
///
/// Invariants, maintained by the mutators below:
/// - `is_locked` implies `lock_end_time` is set.
/// - `is_in_transition` implies both `transition_end_time` and
///   `transition_target_role_id` are set; clearing one clears all three.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_end_time: Option<DateTime<Utc>>,
    pub is_in_transition: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_target_role_id: Option<String>,
    pub last_active_time: DateTime<Utc>,
}

impl EngineState {
    /// Unlocked, non-transitioning state stamped at `now`.
    #[must_use]
    pub const fn initial(now: DateTime<Utc>) -> Self {
        Self {
            is_locked: false,
            lock_end_time: None,
            is_in_transition: false,
            transition_end_time: None,
            transition_target_role_id: None,
            last_active_time: now,
        }
    }

    pub fn arm_lock(&mut self, until: DateTime<Utc>) {
        self.is_locked = true;
        self.lock_end_time = Some(until);
    }

    pub fn clear_lock(&mut self) {
        self.is_locked = false;
        self.lock_end_time = None;
    }

    pub fn begin_transition(&mut self, target_role_id: impl Into<String>, until: DateTime<Utc>) {
        self.is_in_transition = true;
        self.transition_end_time = Some(until);
        self.transition_target_role_id = Some(target_role_id.into());
    }

    pub fn clear_transition(&mut self) {
        self.is_in_transition = false;
        self.transition_end_time = None;
        self.transition_target_role_id = None;
    }

    /// Marks activity at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active_time = now;
    }
}

/// Derived, never-persisted view of the running session timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub is_running: bool,
    /// Elapsed milliseconds of the active session, 0 when idle.
    pub current_duration_ms: i64,
    pub last_update_time: DateTime<Utc>,
}

impl TimerState {
    #[must_use]
    pub const fn idle(now: DateTime<Utc>) -> Self {
        Self {
            is_running: false,
            current_duration_ms: 0,
            last_update_time: now,
        }
    }

    #[must_use]
    pub const fn running(duration_ms: i64, now: DateTime<Utc>) -> Self {
        Self {
            is_running: true,
            current_duration_ms: duration_ms,
            last_update_time: now,
        }
    }
}

/// Computed lock snapshot for consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Role of the session the lock protects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,
    /// Whole seconds until the lock expires, rounded up; 0 when unlocked.
    pub remaining_secs: i64,
    pub can_override: bool,
}

impl LockStatus {
    /// Derives the lock view from persisted state at `now`.
    #[must_use]
    pub fn derive(
        state: &EngineState,
        current_role_id: Option<&str>,
        can_override: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let remaining_secs = if state.is_locked {
            state
                .lock_end_time
                .map_or(0, |end| remaining_whole_secs(end, now))
        } else {
            0
        };
        Self {
            is_locked: state.is_locked,
            end_time: state.lock_end_time,
            role_id: current_role_id.map(ToString::to_string),
            remaining_secs,
            can_override,
        }
    }
}

/// Computed transition snapshot for consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionStatus {
    pub is_transitioning: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_role_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Whole seconds until the switch takes effect, rounded up.
    pub remaining_secs: i64,
    /// A pending transition can always be cancelled.
    pub can_cancel: bool,
}

impl TransitionStatus {
    /// Derives the transition view from persisted state at `now`.
    #[must_use]
    pub fn derive(state: &EngineState, now: DateTime<Utc>) -> Self {
        let remaining_secs = if state.is_in_transition {
            state
                .transition_end_time
                .map_or(0, |end| remaining_whole_secs(end, now))
        } else {
            0
        };
        Self {
            is_transitioning: state.is_in_transition,
            target_role_id: state.transition_target_role_id.clone(),
            end_time: state.transition_end_time,
            remaining_secs,
            can_cancel: state.is_in_transition,
        }
    }
}

/// Seconds from `now` until `end`, rounded up, floored at 0.
fn remaining_whole_secs(end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let remaining_ms = (end - now).num_milliseconds();
    if remaining_ms <= 0 {
        0
    } else {
        // div_ceil on signed integers is unstable; remaining_ms > 0 here.
        (remaining_ms + 999) / 1000
    }
}
