//! SQLite storage layer for the role switcher.
//!
//! Persists roles, session history, the event log, and the engine's
//! current-session and state snapshots using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but
//! not `Sync`: a `Database` can be moved between threads but not shared
//! without external synchronization. The async [`Store`] wrapper serializes
//! access behind a mutex and implements the `rsw-core` storage traits; it is
//! what the engine and registry are handed in practice.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond
//! precision, always UTC (e.g., `2025-03-01T09:30:00.000Z`). Lexicographic
//! ordering therefore matches chronological ordering, which the range
//! queries and retention pruning rely on.
//!
//! ## JSON Columns
//!
//! A session row carries its `notes` and `events` as JSON arrays, and an
//! event row carries its optional `meta` as a JSON object; the singleton
//! `current_session` row stores the whole session as one JSON document.
//! When evolving these payloads, adding fields is safe (old rows
//! deserialize with defaults); removing or renaming fields requires a
//! migration.
//!
//! Sessions reference roles by id without a foreign key: deleting a role
//! must keep its historical sessions intact.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use thiserror::Error;

use rsw_core::{
    EngineSettings, EngineState, Role, RoleStore, Session, SessionEvent, SessionStore,
    StorageError,
};

/// Version written into export bundles. Imports accept any bundle with
/// the same major version.
pub const BUNDLE_VERSION: &str = "1.0.0";

/// Closed sessions kept after pruning, newest first.
pub const SESSION_RETENTION_LIMIT: usize = 1000;

/// Log events kept after pruning, newest first.
pub const EVENT_RETENTION_LIMIT: usize = 5000;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid {column} timestamp for {id}: {value}")]
    TimestampParse {
        id: String,
        column: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A JSON column failed to serialize or deserialize.
    #[error("invalid stored payload for {id}: {message}")]
    InvalidPayload { id: String, message: String },
    /// An update referenced a role that is not stored.
    #[error("no stored role with id {0}")]
    MissingRole(String),
    /// The bundle was produced by an incompatible schema version.
    #[error("unsupported export bundle version: {0}")]
    UnsupportedBundleVersion(String),
}

/// Everything needed to rebuild a database on another machine.
///
/// The active session, when one exists, travels inside `sessions` with
/// `is_active` set; import restores it as the current session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub roles: Vec<Role>,
    pub sessions: Vec<Session>,
    pub events: Vec<SessionEvent>,
    /// Lock and transition record at export time, when one was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<EngineState>,
    /// Settings snapshot for reference; import does not apply it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<EngineSettings>,
}

/// Counts from an [`Database::import_bundle`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub roles: usize,
    pub sessions: usize,
    pub events: usize,
    pub restored_active_session: bool,
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection
    /// closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS roles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                color_hex TEXT NOT NULL,
                description TEXT,
                icon TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Closed sessions. notes and events are JSON arrays; role_id
            -- has no foreign key so deleted roles keep their history.
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                role_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                duration_ms INTEGER,
                notes TEXT NOT NULL,
                events TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(start_time);
            CREATE INDEX IF NOT EXISTS idx_sessions_role ON sessions(role_id);

            -- Append-only lifecycle log. meta is a JSON object when present.
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                role_id TEXT NOT NULL,
                at TEXT NOT NULL,
                meta TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_events_at ON events(at);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
            CREATE INDEX IF NOT EXISTS idx_events_role ON events(role_id);

            -- Singleton rows, keyed at 1.
            CREATE TABLE IF NOT EXISTS engine_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                is_locked INTEGER NOT NULL,
                lock_end_time TEXT,
                is_in_transition INTEGER NOT NULL,
                transition_end_time TEXT,
                transition_target_role_id TEXT,
                last_active_time TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS current_session (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Lists all roles in creation order.
    pub fn list_roles(&self) -> Result<Vec<Role>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, name, color_hex, description, icon, created_at, updated_at
            FROM roles
            ORDER BY created_at ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RoleRow {
                id: row.get(0)?,
                name: row.get(1)?,
                color_hex: row.get(2)?,
                description: row.get(3)?,
                icon: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })?;
        let mut roles = Vec::new();
        for row in rows {
            roles.push(row?.into_role()?);
        }
        Ok(roles)
    }

    /// Inserts a role. Fails on id collision.
    pub fn insert_role(&self, role: &Role) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO roles (id, name, color_hex, description, icon, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                role.id,
                role.name,
                role.color_hex,
                role.description,
                role.icon,
                format_timestamp(role.created_at),
                format_timestamp(role.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Updates an existing role, leaving `created_at` untouched.
    pub fn update_role(&self, role: &Role) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "
            UPDATE roles
            SET name = ?, color_hex = ?, description = ?, icon = ?, updated_at = ?
            WHERE id = ?
            ",
            params![
                role.name,
                role.color_hex,
                role.description,
                role.icon,
                format_timestamp(role.updated_at),
                role.id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::MissingRole(role.id.clone()));
        }
        Ok(())
    }

    /// Deletes a role. Missing ids are a no-op; history is untouched.
    pub fn delete_role(&self, role_id: &str) -> Result<(), DbError> {
        self.conn
            .execute("DELETE FROM roles WHERE id = ?", [role_id])?;
        Ok(())
    }

    /// Loads the persisted current session, if any.
    pub fn load_current_session(&self) -> Result<Option<Session>, DbError> {
        let data: Option<String> = self
            .conn
            .query_row("SELECT data FROM current_session WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        data.map(|json| from_json(&json, "current_session")).transpose()
    }

    /// Overwrites the current-session slot; `None` clears it.
    pub fn save_current_session(&self, session: Option<&Session>) -> Result<(), DbError> {
        match session {
            Some(session) => {
                let data = to_json(session, &session.id)?;
                self.conn.execute(
                    "INSERT OR REPLACE INTO current_session (id, data) VALUES (1, ?)",
                    [data],
                )?;
            }
            None => {
                self.conn
                    .execute("DELETE FROM current_session WHERE id = 1", [])?;
            }
        }
        Ok(())
    }

    /// Loads the persisted engine state, if one was ever saved.
    pub fn load_state(&self) -> Result<Option<EngineState>, DbError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT is_locked, lock_end_time, is_in_transition,
                       transition_end_time, transition_target_role_id, last_active_time
                FROM engine_state
                WHERE id = 1
                ",
                [],
                |row| {
                    Ok(StateRow {
                        is_locked: row.get(0)?,
                        lock_end_time: row.get(1)?,
                        is_in_transition: row.get(2)?,
                        transition_end_time: row.get(3)?,
                        transition_target_role_id: row.get(4)?,
                        last_active_time: row.get(5)?,
                    })
                },
            )
            .optional()?;
        row.map(StateRow::into_state).transpose()
    }

    /// Overwrites the persisted engine state.
    pub fn save_state(&self, state: &EngineState) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT OR REPLACE INTO engine_state
            (id, is_locked, lock_end_time, is_in_transition,
             transition_end_time, transition_target_role_id, last_active_time)
            VALUES (1, ?, ?, ?, ?, ?, ?)
            ",
            params![
                state.is_locked,
                state.lock_end_time.map(format_timestamp),
                state.is_in_transition,
                state.transition_end_time.map(format_timestamp),
                state.transition_target_role_id,
                format_timestamp(state.last_active_time),
            ],
        )?;
        Ok(())
    }

    /// Appends a terminal session, replacing any stored row with the
    /// same id.
    pub fn append_session(&self, session: &Session) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT OR REPLACE INTO sessions
            (id, role_id, start_time, end_time, duration_ms, notes, events, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                session.id,
                session.role_id,
                format_timestamp(session.start_time),
                session.end_time.map(format_timestamp),
                session.duration_ms,
                to_json(&session.notes, &session.id)?,
                to_json(&session.events, &session.id)?,
                session.is_active,
            ],
        )?;
        Ok(())
    }

    /// Lists all stored sessions ordered by start time then id.
    pub fn list_sessions(&self) -> Result<Vec<Session>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, role_id, start_time, end_time, duration_ms, notes, events, is_active
            FROM sessions
            ORDER BY start_time ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([], session_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_session()?);
        }
        Ok(sessions)
    }

    /// Lists sessions starting within a time range.
    ///
    /// The range is inclusive of `start` and exclusive of `end`.
    pub fn sessions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>, DbError> {
        if end <= start {
            return Ok(Vec::new());
        }
        let start = format_timestamp(start);
        let end = format_timestamp(end);
        let mut stmt = self.conn.prepare(
            "
            SELECT id, role_id, start_time, end_time, duration_ms, notes, events, is_active
            FROM sessions
            WHERE start_time >= ? AND start_time < ?
            ORDER BY start_time ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([start, end], session_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_session()?);
        }
        Ok(sessions)
    }

    /// Appends one event, ignoring duplicates by id.
    pub fn append_event(&self, event: &SessionEvent) -> Result<(), DbError> {
        let meta = event
            .meta
            .as_ref()
            .map(|meta| to_json(meta, &event.id))
            .transpose()?;
        self.conn.execute(
            "
            INSERT OR IGNORE INTO events (id, type, role_id, at, meta)
            VALUES (?, ?, ?, ?, ?)
            ",
            params![
                event.id,
                event.kind.as_str(),
                event.role_id,
                format_timestamp(event.at),
                meta,
            ],
        )?;
        Ok(())
    }

    /// Lists all events ordered by timestamp then id.
    pub fn list_events(&self) -> Result<Vec<SessionEvent>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, type, role_id, at, meta
            FROM events
            ORDER BY at ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([], event_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        Ok(events)
    }

    /// Lists events within a time range.
    ///
    /// The range is inclusive of `start` and exclusive of `end`.
    pub fn events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SessionEvent>, DbError> {
        if end <= start {
            return Ok(Vec::new());
        }
        let start = format_timestamp(start);
        let end = format_timestamp(end);
        let mut stmt = self.conn.prepare(
            "
            SELECT id, type, role_id, at, meta
            FROM events
            WHERE at >= ? AND at < ?
            ORDER BY at ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([start, end], event_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        Ok(events)
    }

    /// Deletes the oldest rows beyond the retention limits.
    ///
    /// Returns the number of sessions and events removed.
    pub fn prune(&self, max_sessions: usize, max_events: usize) -> Result<(usize, usize), DbError> {
        let session_limit = i64::try_from(max_sessions).unwrap_or(i64::MAX);
        let event_limit = i64::try_from(max_events).unwrap_or(i64::MAX);
        let sessions_removed = self.conn.execute(
            "
            DELETE FROM sessions WHERE id NOT IN (
                SELECT id FROM sessions ORDER BY start_time DESC, id DESC LIMIT ?
            )
            ",
            [session_limit],
        )?;
        let events_removed = self.conn.execute(
            "
            DELETE FROM events WHERE id NOT IN (
                SELECT id FROM events ORDER BY at DESC, id DESC LIMIT ?
            )
            ",
            [event_limit],
        )?;
        if sessions_removed > 0 || events_removed > 0 {
            tracing::debug!(
                sessions = sessions_removed,
                events = events_removed,
                "pruned history"
            );
        }
        Ok((sessions_removed, events_removed))
    }

    /// Collects the full database into a portable bundle.
    ///
    /// An active session is appended to `sessions` so it survives the
    /// round trip.
    pub fn export_bundle(
        &self,
        settings: Option<EngineSettings>,
        now: DateTime<Utc>,
    ) -> Result<ExportBundle, DbError> {
        let mut sessions = self.list_sessions()?;
        if let Some(current) = self.load_current_session()? {
            sessions.push(current);
        }
        Ok(ExportBundle {
            version: BUNDLE_VERSION.to_string(),
            exported_at: now,
            roles: self.list_roles()?,
            sessions,
            events: self.list_events()?,
            state: self.load_state()?,
            settings,
        })
    }

    /// Replaces this database's contents with the bundle, in one
    /// transaction.
    ///
    /// Existing roles, sessions, and events are dropped first; a backup
    /// restores to exactly what was exported. The first active session
    /// in the bundle becomes the current session and the exported
    /// lock/transition record comes back with it. The settings snapshot
    /// is ignored; settings belong to the configuration layer.
    pub fn import_bundle(&mut self, bundle: &ExportBundle) -> Result<ImportStats, DbError> {
        if bundle.version.split('.').next() != BUNDLE_VERSION.split('.').next() {
            return Err(DbError::UnsupportedBundleVersion(bundle.version.clone()));
        }

        let mut stats = ImportStats::default();
        let restored = bundle.sessions.iter().find(|s| s.is_active).cloned();

        let tx = self.conn.transaction()?;
        for table in ["roles", "sessions", "events", "current_session", "engine_state"] {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR REPLACE INTO roles
                (id, name, color_hex, description, icon, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            for role in &bundle.roles {
                stats.roles += stmt.execute(params![
                    role.id,
                    role.name,
                    role.color_hex,
                    role.description,
                    role.icon,
                    format_timestamp(role.created_at),
                    format_timestamp(role.updated_at),
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR REPLACE INTO sessions
                (id, role_id, start_time, end_time, duration_ms, notes, events, is_active)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            // The active session goes to current_session below, not into
            // history; it lands in history when it closes.
            for session in bundle.sessions.iter().filter(|s| !s.is_active) {
                stats.sessions += stmt.execute(params![
                    session.id,
                    session.role_id,
                    format_timestamp(session.start_time),
                    session.end_time.map(format_timestamp),
                    session.duration_ms,
                    to_json(&session.notes, &session.id)?,
                    to_json(&session.events, &session.id)?,
                    session.is_active,
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR IGNORE INTO events (id, type, role_id, at, meta)
                VALUES (?, ?, ?, ?, ?)
                ",
            )?;
            for event in &bundle.events {
                let meta = event
                    .meta
                    .as_ref()
                    .map(|meta| to_json(meta, &event.id))
                    .transpose()?;
                stats.events += stmt.execute(params![
                    event.id,
                    event.kind.as_str(),
                    event.role_id,
                    format_timestamp(event.at),
                    meta,
                ])?;
            }
        }
        if let Some(session) = &restored {
            let data = to_json(session, &session.id)?;
            tx.execute(
                "INSERT OR REPLACE INTO current_session (id, data) VALUES (1, ?)",
                [data],
            )?;
            stats.sessions += 1;
            stats.restored_active_session = true;
        }
        if let Some(state) = &bundle.state {
            tx.execute(
                "
                INSERT OR REPLACE INTO engine_state
                (id, is_locked, lock_end_time, is_in_transition,
                 transition_end_time, transition_target_role_id, last_active_time)
                VALUES (1, ?, ?, ?, ?, ?, ?)
                ",
                params![
                    state.is_locked,
                    state.lock_end_time.map(format_timestamp),
                    state.is_in_transition,
                    state.transition_end_time.map(format_timestamp),
                    state.transition_target_role_id,
                    format_timestamp(state.last_active_time),
                ],
            )?;
        }
        tx.commit()?;

        tracing::info!(
            roles = stats.roles,
            sessions = stats.sessions,
            events = stats.events,
            restored_active = stats.restored_active_session,
            "imported bundle"
        );
        Ok(stats)
    }
}

#[derive(Debug)]
struct RoleRow {
    id: String,
    name: String,
    color_hex: String,
    description: Option<String>,
    icon: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RoleRow {
    fn into_role(self) -> Result<Role, DbError> {
        Ok(Role {
            created_at: parse_timestamp(&self.created_at, &self.id, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, &self.id, "updated_at")?,
            id: self.id,
            name: self.name,
            color_hex: self.color_hex,
            description: self.description,
            icon: self.icon,
        })
    }
}

#[derive(Debug)]
struct SessionRow {
    id: String,
    role_id: String,
    start_time: String,
    end_time: Option<String>,
    duration_ms: Option<i64>,
    notes: String,
    events: String,
    is_active: bool,
}

fn session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        role_id: row.get(1)?,
        start_time: row.get(2)?,
        end_time: row.get(3)?,
        duration_ms: row.get(4)?,
        notes: row.get(5)?,
        events: row.get(6)?,
        is_active: row.get(7)?,
    })
}

impl SessionRow {
    fn into_session(self) -> Result<Session, DbError> {
        Ok(Session {
            start_time: parse_timestamp(&self.start_time, &self.id, "start_time")?,
            end_time: self
                .end_time
                .as_deref()
                .map(|value| parse_timestamp(value, &self.id, "end_time"))
                .transpose()?,
            notes: from_json(&self.notes, &self.id)?,
            events: from_json(&self.events, &self.id)?,
            id: self.id,
            role_id: self.role_id,
            duration_ms: self.duration_ms,
            is_active: self.is_active,
        })
    }
}

#[derive(Debug)]
struct EventRow {
    id: String,
    kind: String,
    role_id: String,
    at: String,
    meta: Option<String>,
}

fn event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        role_id: row.get(2)?,
        at: row.get(3)?,
        meta: row.get(4)?,
    })
}

impl EventRow {
    fn into_event(self) -> Result<SessionEvent, DbError> {
        let kind = self
            .kind
            .parse()
            .map_err(|err: rsw_core::UnknownEventKind| DbError::InvalidPayload {
                id: self.id.clone(),
                message: err.to_string(),
            })?;
        Ok(SessionEvent {
            kind,
            at: parse_timestamp(&self.at, &self.id, "at")?,
            meta: self
                .meta
                .as_deref()
                .map(|value| from_json(value, &self.id))
                .transpose()?,
            id: self.id,
            role_id: self.role_id,
        })
    }
}

#[derive(Debug)]
struct StateRow {
    is_locked: bool,
    lock_end_time: Option<String>,
    is_in_transition: bool,
    transition_end_time: Option<String>,
    transition_target_role_id: Option<String>,
    last_active_time: String,
}

impl StateRow {
    fn into_state(self) -> Result<EngineState, DbError> {
        Ok(EngineState {
            is_locked: self.is_locked,
            lock_end_time: self
                .lock_end_time
                .as_deref()
                .map(|value| parse_timestamp(value, "engine_state", "lock_end_time"))
                .transpose()?,
            is_in_transition: self.is_in_transition,
            transition_end_time: self
                .transition_end_time
                .as_deref()
                .map(|value| parse_timestamp(value, "engine_state", "transition_end_time"))
                .transpose()?,
            transition_target_role_id: self.transition_target_role_id,
            last_active_time: parse_timestamp(
                &self.last_active_time,
                "engine_state",
                "last_active_time",
            )?,
        })
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str, id: &str, column: &'static str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            id: id.to_string(),
            column,
            value: value.to_string(),
            source,
        })
}

fn to_json<T: Serialize>(value: &T, id: &str) -> Result<String, DbError> {
    serde_json::to_string(value).map_err(|err| DbError::InvalidPayload {
        id: id.to_string(),
        message: err.to_string(),
    })
}

fn from_json<T: DeserializeOwned>(value: &str, id: &str) -> Result<T, DbError> {
    serde_json::from_str(value).map_err(|err| DbError::InvalidPayload {
        id: id.to_string(),
        message: err.to_string(),
    })
}

/// Async adapter over [`Database`] implementing the `rsw-core` storage
/// traits.
///
/// One `Store` is shared by the engine and the registry; the inner mutex
/// serializes every database call.
pub struct Store {
    db: tokio::sync::Mutex<Database>,
}

impl Store {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db: tokio::sync::Mutex::new(db),
        }
    }

    /// All stored sessions, oldest first.
    pub async fn sessions(&self) -> Result<Vec<Session>, DbError> {
        self.db.lock().await.list_sessions()
    }

    /// Sessions starting in `[start, end)`, oldest first.
    pub async fn sessions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>, DbError> {
        self.db.lock().await.sessions_in_range(start, end)
    }

    /// The full event log, oldest first.
    pub async fn events(&self) -> Result<Vec<SessionEvent>, DbError> {
        self.db.lock().await.list_events()
    }

    /// Events recorded in `[start, end)`, oldest first.
    pub async fn events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SessionEvent>, DbError> {
        self.db.lock().await.events_in_range(start, end)
    }

    /// See [`Database::export_bundle`].
    pub async fn export_bundle(
        &self,
        settings: Option<EngineSettings>,
        now: DateTime<Utc>,
    ) -> Result<ExportBundle, DbError> {
        self.db.lock().await.export_bundle(settings, now)
    }

    /// See [`Database::import_bundle`].
    pub async fn import_bundle(&self, bundle: &ExportBundle) -> Result<ImportStats, DbError> {
        self.db.lock().await.import_bundle(bundle)
    }
}

fn storage_err(context: &'static str) -> impl FnOnce(DbError) -> StorageError {
    move |err| StorageError::new(context, err)
}

#[async_trait]
impl SessionStore for Store {
    async fn load_current_session(&self) -> Result<Option<Session>, StorageError> {
        self.db
            .lock()
            .await
            .load_current_session()
            .map_err(storage_err("load current session"))
    }

    async fn save_current_session(&self, session: Option<&Session>) -> Result<(), StorageError> {
        self.db
            .lock()
            .await
            .save_current_session(session)
            .map_err(storage_err("save current session"))
    }

    async fn load_state(&self) -> Result<Option<EngineState>, StorageError> {
        self.db
            .lock()
            .await
            .load_state()
            .map_err(storage_err("load engine state"))
    }

    async fn save_state(&self, state: &EngineState) -> Result<(), StorageError> {
        self.db
            .lock()
            .await
            .save_state(state)
            .map_err(storage_err("save engine state"))
    }

    async fn append_session_history(&self, session: &Session) -> Result<(), StorageError> {
        let db = self.db.lock().await;
        db.append_session(session)
            .map_err(storage_err("append session history"))?;
        db.prune(SESSION_RETENTION_LIMIT, EVENT_RETENTION_LIMIT)
            .map_err(storage_err("prune history"))?;
        Ok(())
    }

    async fn append_event(&self, event: &SessionEvent) -> Result<(), StorageError> {
        let db = self.db.lock().await;
        db.append_event(event)
            .map_err(storage_err("append event"))?;
        db.prune(SESSION_RETENTION_LIMIT, EVENT_RETENTION_LIMIT)
            .map_err(storage_err("prune history"))?;
        Ok(())
    }
}

#[async_trait]
impl RoleStore for Store {
    async fn load_roles(&self) -> Result<Vec<Role>, StorageError> {
        self.db
            .lock()
            .await
            .list_roles()
            .map_err(storage_err("load roles"))
    }

    async fn insert_role(&self, role: &Role) -> Result<(), StorageError> {
        self.db
            .lock()
            .await
            .insert_role(role)
            .map_err(storage_err("insert role"))
    }

    async fn update_role(&self, role: &Role) -> Result<(), StorageError> {
        self.db
            .lock()
            .await
            .update_role(role)
            .map_err(storage_err("update role"))
    }

    async fn delete_role(&self, role_id: &str) -> Result<(), StorageError> {
        self.db
            .lock()
            .await
            .delete_role(role_id)
            .map_err(storage_err("delete role"))
    }
}
