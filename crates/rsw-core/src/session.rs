//! Session records.
//!
//! A session is one contiguous interval during which a single role was
//! active. At most one session is active system-wide; all others are
//! terminal and immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::SessionEvent;

/// One contiguous interval of activity in a single role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub role_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Set iff `end_time` is set; always `end_time - start_time` in
    /// milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub notes: Vec<String>,
    /// Lifecycle events recorded while this session was current. A
    /// `switch` event appears in both the closed and the opened session.
    pub events: Vec<SessionEvent>,
    pub is_active: bool,
}

impl Session {
    /// Opens a new active session for `role_id` starting at `at`.
    #[must_use]
    pub fn begin(role_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role_id: role_id.into(),
            start_time: at,
            end_time: None,
            duration_ms: None,
            notes: Vec::new(),
            events: Vec::new(),
            is_active: true,
        }
    }

    /// Closes the session at `at`, fixing `duration_ms` to the elapsed
    /// wall-clock milliseconds.
    pub fn close(&mut self, at: DateTime<Utc>) {
        self.end_time = Some(at);
        self.duration_ms = Some((at - self.start_time).num_milliseconds());
        self.is_active = false;
    }

    /// Elapsed milliseconds of this session.
    ///
    /// Active sessions are measured live against `now`; closed sessions
    /// use the stored duration, falling back to `end_time - start_time`
    /// for records imported without one.
    #[must_use]
    pub fn effective_duration_ms(&self, now: DateTime<Utc>) -> i64 {
        if let Some(duration) = self.duration_ms {
            duration
        } else if self.is_active {
            (now - self.start_time).num_milliseconds()
        } else if let Some(end) = self.end_time {
            (end - self.start_time).num_milliseconds()
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().expect("timestamp")
    }

    #[test]
    fn test_begin_is_active_and_empty() {
        let session = Session::begin("role-1", ts("2025-03-01T09:00:00Z"));
        assert!(session.is_active);
        assert!(session.end_time.is_none());
        assert!(session.duration_ms.is_none());
        assert!(session.notes.is_empty());
        assert!(session.events.is_empty());
    }

    #[test]
    fn test_close_fixes_duration_to_the_millisecond() {
        let start = ts("2025-03-01T09:00:00Z");
        let mut session = Session::begin("role-1", start);
        let end = start + Duration::milliseconds(45_678);
        session.close(end);
        assert!(!session.is_active);
        assert_eq!(session.end_time, Some(end));
        assert_eq!(session.duration_ms, Some(45_678));
    }

    #[test]
    fn test_effective_duration_live_for_active() {
        let start = ts("2025-03-01T09:00:00Z");
        let session = Session::begin("role-1", start);
        let now = start + Duration::seconds(90);
        assert_eq!(session.effective_duration_ms(now), 90_000);
    }

    #[test]
    fn test_effective_duration_prefers_stored_value() {
        let start = ts("2025-03-01T09:00:00Z");
        let mut session = Session::begin("role-1", start);
        session.close(start + Duration::seconds(60));
        // `now` long after the close must not change the answer.
        let now = start + Duration::hours(5);
        assert_eq!(session.effective_duration_ms(now), 60_000);
    }

    #[test]
    fn test_effective_duration_falls_back_to_end_time() {
        let start = ts("2025-03-01T09:00:00Z");
        let mut session = Session::begin("role-1", start);
        session.end_time = Some(start + Duration::seconds(30));
        session.is_active = false;
        assert_eq!(session.effective_duration_ms(start), 30_000);
    }
}
