//! Append-only lifecycle events.
//!
//! Every state-machine transition (start, end, switch, cancel) produces
//! one immutable event. The event log is the audit trail analytics
//! replays; nothing ever mutates an event after creation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of lifecycle transition an event records.
///
/// `Pause` and `Resume` exist in the data model for imported history but
/// no operation currently emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Start,
    End,
    Switch,
    CancelTransition,
    Pause,
    Resume,
}

impl EventKind {
    /// String representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Switch => "switch",
            Self::CancelTransition => "cancelTransition",
            Self::Pause => "pause",
            Self::Resume => "resume",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "end" => Ok(Self::End),
            "switch" => Ok(Self::Switch),
            "cancelTransition" => Ok(Self::CancelTransition),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            _ => Err(UnknownEventKind(s.to_string())),
        }
    }
}

/// Error type for unknown event kind strings.
#[derive(Debug, Clone)]
pub struct UnknownEventKind(String);

impl fmt::Display for UnknownEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event kind: {}", self.0)
    }
}

impl std::error::Error for UnknownEventKind {}

/// Optional context attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    /// Role that was active before a switch, or the abandoned target of
    /// a cancelled transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_role_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Elapsed milliseconds of the session the event closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Session the event was recorded against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EventMeta {
    /// True when no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.previous_role_id.is_none()
            && self.note.is_none()
            && self.duration_ms.is_none()
            && self.session_id.is_none()
            && self.reason.is_none()
    }
}

/// One immutable lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Role the event is recorded against. For switches this is the role
    /// being switched *to*; the previous role lives in `meta`.
    pub role_id: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<EventMeta>,
}

impl SessionEvent {
    /// Creates a new event with a fresh id at the given instant.
    ///
    /// An all-empty meta collapses to `None`.
    #[must_use]
    pub fn record(
        kind: EventKind,
        role_id: impl Into<String>,
        at: DateTime<Utc>,
        meta: EventMeta,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            role_id: role_id.into(),
            at,
            meta: if meta.is_empty() { None } else { Some(meta) },
        }
    }
}
