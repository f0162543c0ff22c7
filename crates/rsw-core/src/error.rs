//! Error taxonomy shared by the engine and the registry.

use thiserror::Error;

use crate::role::ValidationIssue;
use crate::store::StorageError;

/// Result alias for engine and registry operations.
pub type Result<T> = std::result::Result<T, RoleSwitchError>;

/// Every way an engine or registry operation can fail.
///
/// Each failure leaves the state machine in the state it was in before
/// the call; nothing here is retried internally.
#[derive(Debug, Error)]
pub enum RoleSwitchError {
    /// The referenced role id (or name) does not exist in the registry.
    #[error("role not found: {id}")]
    RoleNotFound { id: String },

    /// A session is already active; end or switch it instead.
    #[error("a session is already active")]
    SessionAlreadyActive,

    /// The operation needs an active session and none exists.
    #[error("no active session")]
    NoActiveSession,

    /// The active session is still inside its minimum duration.
    #[error("session is locked for another {remaining_secs}s")]
    SessionLocked { remaining_secs: i64 },

    /// A role transition is already pending.
    #[error("a role transition is already in progress")]
    TransitionInProgress,

    /// There is no pending transition to cancel.
    #[error("no transition to cancel")]
    NoTransitionActive,

    /// The switch target is the role that is already active.
    #[error("role {role_id} is already active")]
    SameRole { role_id: String },

    /// Registry input failed validation; every reason is listed.
    #[error("invalid role: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// A persistence call failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
