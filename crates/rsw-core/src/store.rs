//! Persistence collaborator traits.
//!
//! The engine and registry talk to storage through these traits so the
//! domain crate never touches a database directly. Every call is
//! individually awaitable; failures surface as [`StorageError`] and are
//! never retried here.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;

use crate::event::SessionEvent;
use crate::role::Role;
use crate::session::Session;
use crate::state::EngineState;

/// Opaque failure from a persistence call.
#[derive(Debug, Error)]
#[error("{context}")]
pub struct StorageError {
    context: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StorageError {
    /// Wraps an underlying error with context.
    pub fn new(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    /// A failure with no underlying cause.
    pub fn message(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            source: None,
        }
    }
}

/// Persistence for the session engine's mutable state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the persisted current session, if any.
    async fn load_current_session(&self) -> Result<Option<Session>, StorageError>;

    /// Overwrites the current-session slot; `None` clears it.
    async fn save_current_session(&self, session: Option<&Session>) -> Result<(), StorageError>;

    /// Loads the persisted engine state, if any was ever saved.
    async fn load_state(&self) -> Result<Option<EngineState>, StorageError>;

    /// Overwrites the persisted engine state.
    async fn save_state(&self, state: &EngineState) -> Result<(), StorageError>;

    /// Appends a terminal session to history.
    async fn append_session_history(&self, session: &Session) -> Result<(), StorageError>;

    /// Appends one event to the event log.
    async fn append_event(&self, event: &SessionEvent) -> Result<(), StorageError>;
}

/// Persistence for the role registry.
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn load_roles(&self) -> Result<Vec<Role>, StorageError>;
    async fn insert_role(&self, role: &Role) -> Result<(), StorageError>;
    async fn update_role(&self, role: &Role) -> Result<(), StorageError>;
    async fn delete_role(&self, role_id: &str) -> Result<(), StorageError>;
}

/// In-memory implementation of both storage traits.
///
/// Useful for tests and for running the engine without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    roles: Vec<Role>,
    current_session: Option<Session>,
    state: Option<EngineState>,
    history: Vec<Session>,
    events: Vec<SessionEvent>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::message("memory store lock poisoned"))
    }

    /// Snapshot of the session history, oldest first.
    pub fn history(&self) -> Result<Vec<Session>, StorageError> {
        Ok(self.lock()?.history.clone())
    }

    /// Snapshot of the event log, oldest first.
    pub fn events(&self) -> Result<Vec<SessionEvent>, StorageError> {
        Ok(self.lock()?.events.clone())
    }

    /// Pre-seeds persisted state, as if left behind by an earlier run.
    pub fn seed(
        &self,
        state: Option<EngineState>,
        current_session: Option<Session>,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        inner.state = state;
        inner.current_session = current_session;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_current_session(&self) -> Result<Option<Session>, StorageError> {
        Ok(self.lock()?.current_session.clone())
    }

    async fn save_current_session(&self, session: Option<&Session>) -> Result<(), StorageError> {
        self.lock()?.current_session = session.cloned();
        Ok(())
    }

    async fn load_state(&self) -> Result<Option<EngineState>, StorageError> {
        Ok(self.lock()?.state.clone())
    }

    async fn save_state(&self, state: &EngineState) -> Result<(), StorageError> {
        self.lock()?.state = Some(state.clone());
        Ok(())
    }

    async fn append_session_history(&self, session: &Session) -> Result<(), StorageError> {
        self.lock()?.history.push(session.clone());
        Ok(())
    }

    async fn append_event(&self, event: &SessionEvent) -> Result<(), StorageError> {
        self.lock()?.events.push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn load_roles(&self) -> Result<Vec<Role>, StorageError> {
        Ok(self.lock()?.roles.clone())
    }

    async fn insert_role(&self, role: &Role) -> Result<(), StorageError> {
        self.lock()?.roles.push(role.clone());
        Ok(())
    }

    async fn update_role(&self, role: &Role) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        match inner.roles.iter_mut().find(|r| r.id == role.id) {
            Some(slot) => {
                *slot = role.clone();
                Ok(())
            }
            None => Err(StorageError::message(format!(
                "no stored role with id {}",
                role.id
            ))),
        }
    }

    async fn delete_role(&self, role_id: &str) -> Result<(), StorageError> {
        self.lock()?.roles.retain(|r| r.id != role_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::event::{EventKind, EventMeta};

    #[tokio::test]
    async fn test_memory_store_round_trips() {
        let store = MemoryStore::new();
        assert!(store.load_state().await.unwrap().is_none());
        assert!(store.load_current_session().await.unwrap().is_none());

        let now = Utc::now();
        let state = EngineState::initial(now);
        store.save_state(&state).await.unwrap();
        assert_eq!(store.load_state().await.unwrap(), Some(state));

        let session = Session::begin("role-1", now);
        store.save_current_session(Some(&session)).await.unwrap();
        assert_eq!(store.load_current_session().await.unwrap(), Some(session));
        store.save_current_session(None).await.unwrap();
        assert!(store.load_current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_appends_in_order() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for role in ["a", "b"] {
            let event = SessionEvent::record(EventKind::Start, role, now, EventMeta::default());
            store.append_event(&event).await.unwrap();
        }
        let events = store.events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].role_id, "a");
        assert_eq!(events[1].role_id, "b");
    }
}
