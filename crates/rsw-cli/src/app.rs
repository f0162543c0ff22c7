//! Shared bootstrap for one CLI invocation.
//!
//! Every subcommand runs against the same trio: the SQLite store, the
//! role registry, and the session engine restored from persisted state.
//! Commands are one-shot processes, so [`App::open`] performs the whole
//! startup sequence and `SessionEngine::restore` settles any lock or
//! transition that elapsed while no process was running.

use std::sync::Arc;

use anyhow::{Context, Result, bail};

use rsw_core::{EngineSettings, Role, RoleLookup, RoleRegistry, SessionEngine};
use rsw_db::{Database, Store};

use crate::Config;

/// The store, registry, and engine for one invocation.
pub struct App {
    store: Arc<Store>,
    registry: Arc<RoleRegistry>,
    engine: SessionEngine,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App").finish_non_exhaustive()
    }
}

impl App {
    /// Opens the configured database and restores the engine.
    ///
    /// Ensures the database directory exists and seeds the default
    /// roles on a first run.
    pub async fn open(config: &Config) -> Result<Self> {
        let settings = config.engine_settings();
        let issues = settings.validate();
        if !issues.is_empty() {
            let reasons: Vec<String> = issues.iter().map(ToString::to_string).collect();
            bail!("invalid configuration: {}", reasons.join("; "));
        }

        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create database directory")?;
        }
        let db = Database::open(&config.database_path)
            .with_context(|| format!("failed to open {}", config.database_path.display()))?;
        Self::with_database(db, settings).await
    }

    /// Builds the trio over an already opened database.
    pub async fn with_database(db: Database, settings: EngineSettings) -> Result<Self> {
        let store = Arc::new(Store::new(db));

        let registry = Arc::new(RoleRegistry::new(store.clone()));
        registry.load().await.context("failed to load roles")?;
        if registry.ensure_defaults().await? {
            tracing::info!("seeded default roles");
        }

        let engine = SessionEngine::new(store.clone(), registry.clone(), settings);
        engine.restore().await.context("failed to restore state")?;

        Ok(Self {
            store,
            registry,
            engine,
        })
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &RoleRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    /// Resolves a role argument by display name first, then by id.
    #[must_use]
    pub fn resolve_role(&self, identifier: &str) -> Option<Role> {
        self.registry
            .role_by_name(identifier)
            .or_else(|| self.registry.role(identifier))
    }

    /// Like [`Self::resolve_role`], with a user-facing error.
    pub fn require_role(&self, identifier: &str) -> Result<Role> {
        self.resolve_role(identifier).with_context(|| {
            format!("no role named {identifier:?}; run 'rsw role list' to see them")
        })
    }

    /// Aborts the engine's outstanding timer tasks.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}
