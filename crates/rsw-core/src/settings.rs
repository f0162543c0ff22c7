//! Engine settings supplied by the configuration layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default minimum session duration, in seconds.
pub const DEFAULT_MINIMUM_SESSION_SECS: u32 = 300;

/// Default transition window, in seconds.
pub const DEFAULT_TRANSITION_WINDOW_SECS: u32 = 30;

/// Durations governing the lock and transition behavior.
///
/// A change at runtime applies to future operations only: an already
/// armed lock or transition keeps the deadline it was armed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// Seconds a fresh session stays locked against ending or switching.
    /// 0 disables the lock entirely.
    pub minimum_session_secs: u32,
    /// Seconds a requested switch stays cancellable before taking
    /// effect. 0 makes switches immediate.
    pub transition_window_secs: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            minimum_session_secs: DEFAULT_MINIMUM_SESSION_SECS,
            transition_window_secs: DEFAULT_TRANSITION_WINDOW_SECS,
        }
    }
}

/// A settings value outside its accepted range.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsIssue {
    #[error("minimum session duration must be 0 (disabled) or 300-3600 seconds, got {value}")]
    MinimumSessionOutOfRange { value: u32 },

    #[error("transition window must be 0 (immediate) or 30-600 seconds, got {value}")]
    TransitionWindowOutOfRange { value: u32 },
}

impl EngineSettings {
    /// Checks both durations against their accepted ranges.
    ///
    /// Returns every issue found; an empty vec means the settings are
    /// usable.
    #[must_use]
    pub fn validate(&self) -> Vec<SettingsIssue> {
        let mut issues = Vec::new();
        if self.minimum_session_secs != 0 && !(300..=3600).contains(&self.minimum_session_secs) {
            issues.push(SettingsIssue::MinimumSessionOutOfRange {
                value: self.minimum_session_secs,
            });
        }
        if self.transition_window_secs != 0 && !(30..=600).contains(&self.transition_window_secs) {
            issues.push(SettingsIssue::TransitionWindowOutOfRange {
                value: self.transition_window_secs,
            });
        }
        issues
    }
}
