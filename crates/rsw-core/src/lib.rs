//! Core domain logic for the role switcher.
//!
//! This crate contains the fundamental types and state machine for:
//! - Roles: validated role definitions and the owning registry
//! - Sessions: the single-active-session engine with minimum-duration
//!   locks and cancellable transition windows
//! - Events: the append-only lifecycle log behind all analytics
//! - Analytics: pure aggregations over recorded sessions and events

pub mod analytics;
mod engine;
mod error;
pub mod event;
mod registry;
pub mod role;
mod session;
mod settings;
pub mod state;
mod store;

pub use engine::SessionEngine;
pub use error::{Result, RoleSwitchError};
pub use event::{EventKind, EventMeta, SessionEvent, UnknownEventKind};
pub use registry::{RegistryChange, RoleLookup, RoleRegistry};
pub use role::{Role, RoleDraft, ValidationIssue};
pub use session::Session;
pub use settings::{
    DEFAULT_MINIMUM_SESSION_SECS, DEFAULT_TRANSITION_WINDOW_SECS, EngineSettings, SettingsIssue,
};
pub use state::{EngineState, LockStatus, TimerState, TransitionStatus};
pub use store::{MemoryStore, RoleStore, SessionStore, StorageError};
