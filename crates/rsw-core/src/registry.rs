//! Role registry: the owning collection of role definitions.
//!
//! Mutations are transactional with respect to storage: the in-memory
//! set is updated first, and a failed persistence write rolls that
//! update back before the error surfaces. This is deliberately stricter
//! than the session engine, which keeps optimistic in-memory state on
//! write failure.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tokio::sync::broadcast;

use crate::error::{Result, RoleSwitchError};
use crate::role::{self, Role, RoleDraft};
use crate::store::{RoleStore, StorageError};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A registry mutation, published to subscribers after it persisted.
#[derive(Debug, Clone)]
pub enum RegistryChange {
    Created(Role),
    Updated(Role),
    Removed(Role),
}

/// Synchronous, read-only role lookup handed to the session engine.
pub trait RoleLookup: Send + Sync {
    /// Resolves a role by id.
    fn role(&self, id: &str) -> Option<Role>;

    /// All roles, in registry order.
    fn roles(&self) -> Vec<Role>;
}

/// Owns the role set and keeps it in sync with storage.
pub struct RoleRegistry {
    store: Arc<dyn RoleStore>,
    roles: RwLock<Vec<Role>>,
    changes: broadcast::Sender<RegistryChange>,
}

impl RoleRegistry {
    /// Creates an empty registry over `store`. Call [`Self::load`] to
    /// populate it.
    #[must_use]
    pub fn new(store: Arc<dyn RoleStore>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            store,
            roles: RwLock::new(Vec::new()),
            changes,
        }
    }

    /// Replaces the in-memory set with the persisted one.
    pub async fn load(&self) -> Result<()> {
        let loaded = self.store.load_roles().await?;
        tracing::debug!(count = loaded.len(), "loaded roles");
        *self.write()? = loaded;
        Ok(())
    }

    /// Seeds the default roles when the registry is empty.
    ///
    /// Returns whether anything was created; a non-empty registry is
    /// left untouched.
    pub async fn ensure_defaults(&self) -> Result<bool> {
        if !self.read()?.is_empty() {
            return Ok(false);
        }
        for draft in role::default_role_drafts() {
            self.create(draft).await?;
        }
        Ok(true)
    }

    /// Validates and creates a role, persisting it before returning.
    pub async fn create(&self, draft: RoleDraft) -> Result<Role> {
        let draft = draft.sanitized();
        let new_role = {
            let mut roles = self.write()?;
            let issues = role::validate_draft(&draft, &roles, None);
            if !issues.is_empty() {
                return Err(RoleSwitchError::Validation(issues));
            }
            let new_role = Role::from_draft(draft, Utc::now());
            roles.push(new_role.clone());
            new_role
        };

        if let Err(err) = self.store.insert_role(&new_role).await {
            self.write()?.retain(|r| r.id != new_role.id);
            tracing::warn!(role = %new_role.name, error = %err, "role create rolled back");
            return Err(err.into());
        }

        let _ = self.changes.send(RegistryChange::Created(new_role.clone()));
        Ok(new_role)
    }

    /// Validates and applies a draft to an existing role.
    pub async fn update(&self, id: &str, draft: RoleDraft) -> Result<Role> {
        let draft = draft.sanitized();
        let (previous, updated) = {
            let mut roles = self.write()?;
            let index = roles.iter().position(|r| r.id == id).ok_or_else(|| {
                RoleSwitchError::RoleNotFound { id: id.to_string() }
            })?;
            let issues = role::validate_draft(&draft, &roles, Some(id));
            if !issues.is_empty() {
                return Err(RoleSwitchError::Validation(issues));
            }
            let previous = roles[index].clone();
            let updated = Role {
                id: previous.id.clone(),
                name: draft.name,
                color_hex: draft.color_hex,
                description: draft.description,
                icon: draft.icon,
                created_at: previous.created_at,
                updated_at: Utc::now(),
            };
            roles[index] = updated.clone();
            (previous, updated)
        };

        if let Err(err) = self.store.update_role(&updated).await {
            self.restore(previous)?;
            tracing::warn!(role = %updated.name, error = %err, "role update rolled back");
            return Err(err.into());
        }

        let _ = self.changes.send(RegistryChange::Updated(updated.clone()));
        Ok(updated)
    }

    /// Deletes a role. Historical sessions keep referencing its id.
    pub async fn remove(&self, id: &str) -> Result<Role> {
        let (index, removed) = {
            let mut roles = self.write()?;
            let index = roles.iter().position(|r| r.id == id).ok_or_else(|| {
                RoleSwitchError::RoleNotFound { id: id.to_string() }
            })?;
            (index, roles.remove(index))
        };

        if let Err(err) = self.store.delete_role(id).await {
            let mut roles = self.write()?;
            let at = index.min(roles.len());
            roles.insert(at, removed.clone());
            tracing::warn!(role = %removed.name, error = %err, "role delete rolled back");
            return Err(err.into());
        }

        let _ = self.changes.send(RegistryChange::Removed(removed.clone()));
        Ok(removed)
    }

    /// Creates a copy of an existing role named "`name` (Copy)".
    pub async fn duplicate(&self, id: &str) -> Result<Role> {
        let source = self
            .role(id)
            .ok_or_else(|| RoleSwitchError::RoleNotFound { id: id.to_string() })?;
        self.create(RoleDraft {
            name: format!("{} (Copy)", source.name),
            color_hex: source.color_hex,
            description: source.description,
            icon: source.icon,
        })
        .await
    }

    /// Case-insensitive lookup by display name.
    #[must_use]
    pub fn role_by_name(&self, name: &str) -> Option<Role> {
        let wanted = name.trim();
        self.read()
            .ok()?
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(wanted))
            .cloned()
    }

    /// Roles whose name or description contains `query`,
    /// case-insensitively.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<Role> {
        let needle = query.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return self.roles();
        }
        let Ok(roles) = self.read() else {
            return Vec::new();
        };
        roles
            .iter()
            .filter(|r| {
                r.name.to_ascii_lowercase().contains(&needle)
                    || r.description
                        .as_deref()
                        .is_some_and(|d| d.to_ascii_lowercase().contains(&needle))
            })
            .cloned()
            .collect()
    }

    /// Subscribes to registry mutations. No replay for late subscribers.
    #[must_use]
    pub fn subscribe_changes(&self) -> broadcast::Receiver<RegistryChange> {
        self.changes.subscribe()
    }

    fn restore(&self, previous: Role) -> Result<()> {
        let mut roles = self.write()?;
        if let Some(slot) = roles.iter_mut().find(|r| r.id == previous.id) {
            *slot = previous;
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Role>>> {
        self.roles
            .read()
            .map_err(|_| StorageError::message("role registry lock poisoned").into())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Role>>> {
        self.roles
            .write()
            .map_err(|_| StorageError::message("role registry lock poisoned").into())
    }
}

impl RoleLookup for RoleRegistry {
    fn role(&self, id: &str) -> Option<Role> {
        self.read().ok()?.iter().find(|r| r.id == id).cloned()
    }

    fn roles(&self) -> Vec<Role> {
        self.read().map(|r| (*r).clone()).unwrap_or_default()
    }
}
