//! The session engine: single owner of the active session, the lock,
//! and the transition state.
//!
//! One engine is constructed per process and shared by cloning; all
//! mutating operations serialize through one async mutex, and every
//! persistence write is awaited before the operation returns and before
//! its notifications fire. Timer-driven work (the 1-second tick, lock
//! expiry, transition completion) runs as spawned tasks whose handles
//! are aborted before the state they govern is cleared; an expired
//! timer re-checks its condition under the mutex and becomes a no-op
//! when an explicit call already resolved it.
//!
//! Session mutations are optimistic: a failed write surfaces a storage
//! error but the in-memory transition stands. Registry mutations roll
//! back instead (see [`crate::registry`]); that asymmetry is load-bearing
//! and intentional.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::error::{Result, RoleSwitchError};
use crate::event::{EventKind, EventMeta, SessionEvent};
use crate::registry::RoleLookup;
use crate::role::sanitize_input;
use crate::session::Session;
use crate::settings::EngineSettings;
use crate::state::{EngineState, LockStatus, TimerState, TransitionStatus};
use crate::store::{SessionStore, StorageError};

const NOTIFY_CHANNEL_CAPACITY: usize = 64;
const TICK_INTERVAL: StdDuration = StdDuration::from_secs(1);

/// Cheap-to-clone handle to the one engine instance of the process.
#[derive(Clone)]
pub struct SessionEngine {
    shared: Arc<Shared>,
}

struct Shared {
    store: Arc<dyn SessionStore>,
    roles: Arc<dyn RoleLookup>,
    inner: Mutex<Inner>,
    session_tx: broadcast::Sender<Option<Session>>,
    state_tx: broadcast::Sender<EngineState>,
    timer_tx: broadcast::Sender<TimerState>,
    event_tx: broadcast::Sender<SessionEvent>,
}

struct Inner {
    current: Option<Session>,
    state: EngineState,
    settings: EngineSettings,
    /// Bumped on every lock arm/clear so an expired timer can tell it
    /// is acting on the lock it was armed for.
    lock_epoch: u64,
    /// Same, for the transition window.
    transition_epoch: u64,
    /// Note captured at switch initiation, applied when the deferred
    /// completion fires. Not persisted; lost across restarts.
    pending_switch_note: Option<String>,
    lock_task: Option<JoinHandle<()>>,
    transition_task: Option<JoinHandle<()>>,
    tick_task: Option<JoinHandle<()>>,
}

impl Shared {
    fn emit_session(&self, inner: &Inner) {
        let _ = self.session_tx.send(inner.current.clone());
    }

    fn emit_state(&self, inner: &Inner) {
        let _ = self.state_tx.send(inner.state.clone());
    }

    fn emit_event(&self, event: &SessionEvent) {
        let _ = self.event_tx.send(event.clone());
    }
}

impl SessionEngine {
    /// Creates an engine over its collaborators. Call [`Self::restore`]
    /// afterwards to pick up persisted state.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        roles: Arc<dyn RoleLookup>,
        settings: EngineSettings,
    ) -> Self {
        let (session_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        let (state_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        let (timer_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                store,
                roles,
                inner: Mutex::new(Inner {
                    current: None,
                    state: EngineState::initial(Utc::now()),
                    settings,
                    lock_epoch: 0,
                    transition_epoch: 0,
                    pending_switch_note: None,
                    lock_task: None,
                    transition_task: None,
                    tick_task: None,
                }),
                session_tx,
                state_tx,
                timer_tx,
                event_tx,
            }),
        }
    }

    /// Extension point for future lock-override policies. The only
    /// supported bypass today is [`Self::force_end_session`].
    const fn can_override_lock() -> bool {
        false
    }

    /// Reloads persisted state after a restart.
    ///
    /// An active persisted session becomes current again and the timer
    /// resumes. An already-expired lock is cleared; an already-expired
    /// transition completes synchronously; a still-live lock or
    /// transition is re-armed for its remainder.
    pub async fn restore(&self) -> Result<()> {
        let stored_state = self.shared.store.load_state().await?;
        let stored_session = self.shared.store.load_current_session().await?;

        let mut inner = self.shared.inner.lock().await;
        let now = Utc::now();
        if let Some(state) = stored_state {
            inner.state = state;
        }
        match stored_session {
            Some(session) if session.is_active => {
                tracing::info!(role = %session.role_id, "restored active session");
                inner.current = Some(session);
                start_ticker(&self.shared, &mut inner);
            }
            _ => inner.current = None,
        }

        if inner.state.is_locked {
            match inner.state.lock_end_time {
                Some(end) if end <= now => {
                    clear_lock(&mut inner);
                    tracing::debug!("cleared lock that expired while stopped");
                }
                Some(end) => {
                    let delay = (end - now).to_std().unwrap_or(StdDuration::ZERO);
                    arm_lock_until(&self.shared, &mut inner, end, delay);
                }
                None => {
                    tracing::warn!("persisted lock had no end time; clearing");
                    clear_lock(&mut inner);
                }
            }
        }

        if inner.state.is_in_transition {
            match (
                inner.state.transition_target_role_id.clone(),
                inner.state.transition_end_time,
            ) {
                (Some(_), Some(end)) if end <= now => {
                    inner.transition_epoch += 1;
                    inner.pending_switch_note = None;
                    self.finish_transition(&mut inner, now).await?;
                }
                (Some(target), Some(end)) => {
                    let delay = (end - now).to_std().unwrap_or(StdDuration::ZERO);
                    tracing::debug!(target = %target, "re-armed pending transition");
                    arm_transition(&self.shared, &mut inner, delay);
                }
                _ => {
                    tracing::warn!("persisted transition was incomplete; clearing");
                    inner.state.clear_transition();
                }
            }
        }

        self.shared.store.save_state(&inner.state).await?;
        self.shared.emit_session(&inner);
        self.shared.emit_state(&inner);
        Ok(())
    }

    /// Starts a session in `role_id`.
    pub async fn start_session(&self, role_id: &str, note: Option<&str>) -> Result<Session> {
        let mut inner = self.shared.inner.lock().await;
        self.start_locked(&mut inner, role_id, note).await
    }

    /// Ends the active session, appending `note` when given.
    pub async fn end_session(&self, note: Option<&str>) -> Result<Session> {
        let mut inner = self.shared.inner.lock().await;
        if inner.current.is_none() {
            return Err(RoleSwitchError::NoActiveSession);
        }
        let now = Utc::now();
        if inner.state.is_locked && !Self::can_override_lock() {
            return Err(RoleSwitchError::SessionLocked {
                remaining_secs: lock_remaining_secs(&inner.state, now),
            });
        }
        self.close_current(&mut inner, clean_note(note), now).await
    }

    /// Switches to `role_id`, through the transition window when one is
    /// configured.
    ///
    /// With no active session this behaves as [`Self::start_session`].
    /// With a window, the pre-switch session is returned immediately and
    /// the switch lands when the window elapses uncancelled. With a zero
    /// window the switch is synchronous and the new session is returned.
    pub async fn switch_role(&self, role_id: &str, note: Option<&str>) -> Result<Session> {
        let mut inner = self.shared.inner.lock().await;
        let role = self
            .shared
            .roles
            .role(role_id)
            .ok_or_else(|| RoleSwitchError::RoleNotFound {
                id: role_id.to_string(),
            })?;

        let Some(current_role_id) = inner.current.as_ref().map(|s| s.role_id.clone()) else {
            return self.start_locked(&mut inner, role_id, note).await;
        };
        if current_role_id == role.id {
            return Err(RoleSwitchError::SameRole { role_id: role.id });
        }
        let now = Utc::now();
        if inner.state.is_locked && !Self::can_override_lock() {
            return Err(RoleSwitchError::SessionLocked {
                remaining_secs: lock_remaining_secs(&inner.state, now),
            });
        }
        if inner.state.is_in_transition {
            return Err(RoleSwitchError::TransitionInProgress);
        }

        let note = clean_note(note);
        let window_secs = inner.settings.transition_window_secs;
        if window_secs == 0 {
            return self.direct_switch(&mut inner, &role.id, note, now).await;
        }

        inner
            .state
            .begin_transition(&role.id, now + Duration::seconds(i64::from(window_secs)));
        inner.state.touch(now);
        inner.pending_switch_note = note;
        arm_transition(
            &self.shared,
            &mut inner,
            StdDuration::from_secs(u64::from(window_secs)),
        );
        tracing::info!(target = %role.name, window_secs, "transition started");

        self.shared.store.save_state(&inner.state).await?;
        self.shared.emit_state(&inner);
        // Still the pre-switch session; the switch lands later.
        inner.current.clone().ok_or(RoleSwitchError::NoActiveSession)
    }

    /// Cancels a pending transition, leaving the current session as-is.
    pub async fn cancel_transition(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        if !inner.state.is_in_transition {
            return Err(RoleSwitchError::NoTransitionActive);
        }

        abort_transition_task(&mut inner);
        inner.transition_epoch += 1;
        let abandoned = inner.state.transition_target_role_id.clone();
        inner.state.clear_transition();
        inner.pending_switch_note = None;
        let now = Utc::now();
        inner.state.touch(now);

        let event = inner.current.as_mut().map(|current| {
            let event = SessionEvent::record(
                EventKind::CancelTransition,
                current.role_id.clone(),
                now,
                EventMeta {
                    previous_role_id: abandoned,
                    session_id: Some(current.id.clone()),
                    ..EventMeta::default()
                },
            );
            current.events.push(event.clone());
            event
        });
        tracing::info!("transition cancelled");

        if let Some(event) = &event {
            self.shared.store.append_event(event).await?;
            self.shared.emit_event(event);
        }
        persist_session_and_state(&self.shared, &inner).await?;
        if event.is_some() {
            self.shared.emit_session(&inner);
        }
        self.shared.emit_state(&inner);
        Ok(())
    }

    /// Appends a sanitized note to the active session. Notes are always
    /// allowed, locked or not; an empty note after sanitizing is
    /// silently dropped.
    pub async fn add_session_note(&self, note: &str) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        let cleaned = sanitize_input(note);
        let current = inner
            .current
            .as_mut()
            .ok_or(RoleSwitchError::NoActiveSession)?;
        if cleaned.is_empty() {
            return Ok(());
        }
        current.notes.push(cleaned);

        self.shared
            .store
            .save_current_session(inner.current.as_ref())
            .await?;
        self.shared.emit_session(&inner);
        Ok(())
    }

    /// Ends the active session even while locked, clearing the lock
    /// first. Returns `None` when nothing was active.
    pub async fn force_end_session(&self, reason: Option<&str>) -> Result<Option<Session>> {
        let mut inner = self.shared.inner.lock().await;
        if inner.current.is_none() {
            return Ok(None);
        }
        if inner.state.is_locked {
            clear_lock(&mut inner);
            tracing::debug!("lock cleared for forced end");
        }
        let closed = self
            .close_current(&mut inner, clean_note(reason), Utc::now())
            .await?;
        Ok(Some(closed))
    }

    /// Applies new settings to future operations. An already armed lock
    /// or transition keeps its original deadline.
    pub async fn update_settings(&self, settings: EngineSettings) {
        let mut inner = self.shared.inner.lock().await;
        tracing::debug!(
            minimum_session_secs = settings.minimum_session_secs,
            transition_window_secs = settings.transition_window_secs,
            "settings updated"
        );
        inner.settings = settings;
    }

    /// Aborts all outstanding timer tasks. State is left as persisted.
    pub async fn shutdown(&self) {
        let mut inner = self.shared.inner.lock().await;
        if let Some(task) = inner.lock_task.take() {
            task.abort();
        }
        if let Some(task) = inner.transition_task.take() {
            task.abort();
        }
        stop_ticker(&mut inner);
    }

    /// Snapshot of the active session, if any.
    pub async fn current_session(&self) -> Option<Session> {
        self.shared.inner.lock().await.current.clone()
    }

    /// Snapshot of the persisted engine state.
    pub async fn state(&self) -> EngineState {
        self.shared.inner.lock().await.state.clone()
    }

    /// Effective settings.
    pub async fn settings(&self) -> EngineSettings {
        self.shared.inner.lock().await.settings
    }

    /// Live timer view.
    pub async fn timer_state(&self) -> TimerState {
        let inner = self.shared.inner.lock().await;
        let now = Utc::now();
        inner.current.as_ref().map_or(TimerState::idle(now), |s| {
            TimerState::running(s.effective_duration_ms(now), now)
        })
    }

    /// Lock view with remaining seconds.
    pub async fn lock_status(&self) -> LockStatus {
        let inner = self.shared.inner.lock().await;
        LockStatus::derive(
            &inner.state,
            inner.current.as_ref().map(|s| s.role_id.as_str()),
            Self::can_override_lock(),
            Utc::now(),
        )
    }

    /// Transition view with remaining seconds.
    pub async fn transition_status(&self) -> TransitionStatus {
        let inner = self.shared.inner.lock().await;
        TransitionStatus::derive(&inner.state, Utc::now())
    }

    /// Session-changed notifications: the current session after each
    /// change, `None` when a session ended. No replay.
    #[must_use]
    pub fn subscribe_sessions(&self) -> broadcast::Receiver<Option<Session>> {
        self.shared.session_tx.subscribe()
    }

    /// State-changed notifications. No replay.
    #[must_use]
    pub fn subscribe_state(&self) -> broadcast::Receiver<EngineState> {
        self.shared.state_tx.subscribe()
    }

    /// Once-a-second timer ticks while a session is active. No replay.
    #[must_use]
    pub fn subscribe_timer(&self) -> broadcast::Receiver<TimerState> {
        self.shared.timer_tx.subscribe()
    }

    /// Every appended event, as it is created. No replay.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    async fn start_locked(
        &self,
        inner: &mut Inner,
        role_id: &str,
        note: Option<&str>,
    ) -> Result<Session> {
        let role = self
            .shared
            .roles
            .role(role_id)
            .ok_or_else(|| RoleSwitchError::RoleNotFound {
                id: role_id.to_string(),
            })?;
        if inner.current.is_some() {
            return Err(RoleSwitchError::SessionAlreadyActive);
        }
        if inner.state.is_in_transition {
            return Err(RoleSwitchError::TransitionInProgress);
        }

        let now = Utc::now();
        let mut session = Session::begin(&role.id, now);
        let note = clean_note(note);
        if let Some(text) = &note {
            session.notes.push(text.clone());
        }
        let event = SessionEvent::record(
            EventKind::Start,
            &role.id,
            now,
            EventMeta {
                note,
                session_id: Some(session.id.clone()),
                ..EventMeta::default()
            },
        );
        session.events.push(event.clone());

        inner.current = Some(session.clone());
        inner.state.touch(now);
        if inner.settings.minimum_session_secs > 0 {
            arm_lock(&self.shared, inner, now);
        }
        start_ticker(&self.shared, inner);
        tracing::info!(role = %role.name, "session started");

        self.shared.store.append_event(&event).await?;
        self.shared.emit_event(&event);
        persist_session_and_state(&self.shared, inner).await?;
        self.shared.emit_session(inner);
        self.shared.emit_state(inner);
        Ok(session)
    }

    /// Closes the current session with an `end` event. Callers have
    /// already enforced their lock policy.
    async fn close_current(
        &self,
        inner: &mut Inner,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let mut session = inner.current.take().ok_or(RoleSwitchError::NoActiveSession)?;
        if let Some(text) = &note {
            session.notes.push(text.clone());
        }
        session.close(now);
        let event = SessionEvent::record(
            EventKind::End,
            session.role_id.clone(),
            now,
            EventMeta {
                note,
                duration_ms: session.duration_ms,
                session_id: Some(session.id.clone()),
                ..EventMeta::default()
            },
        );
        session.events.push(event.clone());

        clear_lock(inner);
        stop_ticker(inner);
        inner.state.touch(now);
        tracing::info!(
            role = %session.role_id,
            duration_ms = session.duration_ms,
            "session ended"
        );

        self.shared.store.append_event(&event).await?;
        self.shared.emit_event(&event);
        self.shared.store.append_session_history(&session).await?;
        persist_session_and_state(&self.shared, inner).await?;
        self.shared.emit_session(inner);
        self.shared.emit_state(inner);
        Ok(session)
    }

    /// The synchronous half of a switch: closes the current session with
    /// a `switch` event, opens the new one carrying that same event, and
    /// re-arms the lock when configured.
    async fn direct_switch(
        &self,
        inner: &mut Inner,
        new_role_id: &str,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let mut old = inner.current.take().ok_or(RoleSwitchError::NoActiveSession)?;
        let event = SessionEvent::record(
            EventKind::Switch,
            new_role_id,
            now,
            EventMeta {
                previous_role_id: Some(old.role_id.clone()),
                duration_ms: Some((now - old.start_time).num_milliseconds()),
                session_id: Some(old.id.clone()),
                note: note.clone(),
                ..EventMeta::default()
            },
        );
        old.events.push(event.clone());
        if let Some(text) = &note {
            old.notes.push(text.clone());
        }
        old.close(now);

        let mut fresh = Session::begin(new_role_id, now);
        fresh.events.push(event.clone());
        inner.current = Some(fresh.clone());
        inner.state.touch(now);
        if inner.settings.minimum_session_secs > 0 {
            arm_lock(&self.shared, inner, now);
        }
        tracing::info!(from = %old.role_id, to = %new_role_id, "switched roles");

        self.shared.store.append_event(&event).await?;
        self.shared.emit_event(&event);
        self.shared.store.append_session_history(&old).await?;
        persist_session_and_state(&self.shared, inner).await?;
        self.shared.emit_session(inner);
        self.shared.emit_state(inner);
        Ok(fresh)
    }

    /// Clears transition flags and performs the stored switch. Shared by
    /// the deferred completion and expired-transition recovery.
    async fn finish_transition(&self, inner: &mut Inner, now: DateTime<Utc>) -> Result<()> {
        let Some(target) = inner.state.transition_target_role_id.clone() else {
            inner.state.clear_transition();
            return Ok(());
        };
        inner.state.clear_transition();
        let note = inner.pending_switch_note.take();
        if inner.current.is_some() {
            self.direct_switch(inner, &target, note, now).await?;
        } else {
            tracing::warn!(target = %target, "transition had no session to switch; dropped");
            self.shared.store.save_state(&inner.state).await?;
            self.shared.emit_state(inner);
        }
        Ok(())
    }

    /// Deferred completion body, entered when the window elapses.
    async fn complete_transition_deadline(&self, epoch: u64) {
        let mut inner = self.shared.inner.lock().await;
        if inner.transition_epoch != epoch || !inner.state.is_in_transition {
            // An explicit call resolved the transition first.
            return;
        }
        inner.transition_epoch += 1;
        let now = Utc::now();
        if let Err(err) = self.finish_transition(&mut inner, now).await {
            // The in-memory switch stands; only the write failed.
            tracing::warn!(error = %err, "deferred switch failed to persist");
        }
    }

    /// Lock expiry body, entered when the minimum duration elapses.
    async fn expire_lock_deadline(&self, epoch: u64) {
        let mut inner = self.shared.inner.lock().await;
        if inner.lock_epoch != epoch || !inner.state.is_locked {
            return;
        }
        inner.lock_epoch += 1;
        inner.state.clear_lock();
        tracing::debug!("minimum session lock expired");
        if let Err(err) = self.shared.store.save_state(&inner.state).await {
            tracing::warn!(error = %err, "failed to persist lock expiry");
        }
        self.shared.emit_state(&inner);
    }
}

fn clean_note(note: Option<&str>) -> Option<String> {
    note.map(sanitize_input).filter(|n| !n.is_empty())
}

fn lock_remaining_secs(state: &EngineState, now: DateTime<Utc>) -> i64 {
    LockStatus::derive(state, None, false, now).remaining_secs
}

async fn persist_session_and_state(
    shared: &Shared,
    inner: &Inner,
) -> std::result::Result<(), StorageError> {
    shared
        .store
        .save_current_session(inner.current.as_ref())
        .await?;
    shared.store.save_state(&inner.state).await
}

/// Arms the lock for the configured minimum duration starting at `now`.
fn arm_lock(shared: &Arc<Shared>, inner: &mut Inner, now: DateTime<Utc>) {
    let secs = inner.settings.minimum_session_secs;
    arm_lock_until(
        shared,
        inner,
        now + Duration::seconds(i64::from(secs)),
        StdDuration::from_secs(u64::from(secs)),
    );
}

fn arm_lock_until(
    shared: &Arc<Shared>,
    inner: &mut Inner,
    until: DateTime<Utc>,
    delay: StdDuration,
) {
    if let Some(task) = inner.lock_task.take() {
        task.abort();
    }
    inner.lock_epoch += 1;
    let epoch = inner.lock_epoch;
    inner.state.arm_lock(until);

    let weak = Arc::downgrade(shared);
    inner.lock_task = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(shared) = weak.upgrade() else { return };
        let engine = SessionEngine { shared };
        engine.expire_lock_deadline(epoch).await;
    }));
}

/// Aborts the pending lock-expiry task and clears the lock flags, in
/// that order.
fn clear_lock(inner: &mut Inner) {
    inner.lock_epoch += 1;
    if let Some(task) = inner.lock_task.take() {
        task.abort();
    }
    inner.state.clear_lock();
}

fn arm_transition(shared: &Arc<Shared>, inner: &mut Inner, delay: StdDuration) {
    abort_transition_task(inner);
    inner.transition_epoch += 1;
    let epoch = inner.transition_epoch;

    let weak = Arc::downgrade(shared);
    inner.transition_task = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(shared) = weak.upgrade() else { return };
        let engine = SessionEngine { shared };
        engine.complete_transition_deadline(epoch).await;
    }));
}

fn abort_transition_task(inner: &mut Inner) {
    if let Some(task) = inner.transition_task.take() {
        task.abort();
    }
}

/// Starts the once-a-second tick while a session is active. Idempotent.
fn start_ticker(shared: &Arc<Shared>, inner: &mut Inner) {
    if inner.tick_task.is_some() {
        return;
    }
    let weak = Arc::downgrade(shared);
    inner.tick_task = Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(TICK_INTERVAL).await;
            let Some(shared) = weak.upgrade() else { break };
            let inner = shared.inner.lock().await;
            let now = Utc::now();
            let Some(current) = &inner.current else {
                continue;
            };
            let tick = TimerState::running(current.effective_duration_ms(now), now);
            drop(inner);
            let _ = shared.timer_tx.send(tick);
        }
    }));
}

fn stop_ticker(inner: &mut Inner) {
    if let Some(task) = inner.tick_task.take() {
        task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::result::Result;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::registry::RoleRegistry;
    use crate::role::{Role, RoleDraft};
    use crate::store::MemoryStore;

    struct Bed {
        engine: SessionEngine,
        store: Arc<MemoryStore>,
        role_a: Role,
        role_b: Role,
    }

    const fn settings(minimum_session_secs: u32, transition_window_secs: u32) -> EngineSettings {
        EngineSettings {
            minimum_session_secs,
            transition_window_secs,
        }
    }

    fn draft(name: &str) -> RoleDraft {
        RoleDraft {
            name: name.to_string(),
            color_hex: "#4ECDC4".to_string(),
            ..RoleDraft::default()
        }
    }

    async fn bed(settings: EngineSettings) -> Bed {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(RoleRegistry::new(store.clone()));
        let role_a = registry.create(draft("Focus")).await.unwrap();
        let role_b = registry.create(draft("Meetings")).await.unwrap();
        let engine = SessionEngine::new(store.clone(), registry, settings);
        Bed {
            engine,
            store,
            role_a,
            role_b,
        }
    }

    /// Delegates to a `MemoryStore` but fails writes on demand. Reads
    /// always succeed.
    #[derive(Default)]
    struct FlakySessionStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl FlakySessionStore {
        fn fail_next_writes(&self) {
            self.fail_writes.store(true, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(StorageError::message("injected write failure"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SessionStore for FlakySessionStore {
        async fn load_current_session(&self) -> Result<Option<Session>, StorageError> {
            self.inner.load_current_session().await
        }

        async fn save_current_session(
            &self,
            session: Option<&Session>,
        ) -> Result<(), StorageError> {
            self.check()?;
            self.inner.save_current_session(session).await
        }

        async fn load_state(&self) -> Result<Option<EngineState>, StorageError> {
            self.inner.load_state().await
        }

        async fn save_state(&self, state: &EngineState) -> Result<(), StorageError> {
            self.check()?;
            self.inner.save_state(state).await
        }

        async fn append_session_history(&self, session: &Session) -> Result<(), StorageError> {
            self.check()?;
            self.inner.append_session_history(session).await
        }

        async fn append_event(&self, event: &SessionEvent) -> Result<(), StorageError> {
            self.check()?;
            self.inner.append_event(event).await
        }
    }

    #[tokio::test]
    async fn test_start_and_end_round_trip() {
        let bed = bed(settings(0, 0)).await;
        let started = bed
            .engine
            .start_session(&bed.role_a.id, Some("kickoff"))
            .await
            .unwrap();
        assert!(started.is_active);
        assert_eq!(started.role_id, bed.role_a.id);
        assert_eq!(started.notes, vec!["kickoff"]);
        assert_eq!(started.events.len(), 1);
        assert_eq!(started.events[0].kind, EventKind::Start);
        assert_eq!(
            started.events[0]
                .meta
                .as_ref()
                .and_then(|m| m.note.as_deref()),
            Some("kickoff")
        );

        let ended = bed.engine.end_session(Some("wrapped up")).await.unwrap();
        assert!(!ended.is_active);
        assert_eq!(ended.id, started.id);
        assert!(ended.notes.contains(&"wrapped up".to_string()));
        let kinds: Vec<_> = ended.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Start, EventKind::End]);
        let end_meta = ended.events[1].meta.clone().unwrap();
        assert_eq!(end_meta.duration_ms, ended.duration_ms);
        assert_eq!(end_meta.note.as_deref(), Some("wrapped up"));

        assert!(bed.engine.current_session().await.is_none());
        let history = bed.store.history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, started.id);
        assert_eq!(bed.store.events().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_start_unknown_role() {
        let bed = bed(settings(0, 0)).await;
        let err = bed.engine.start_session("missing", None).await.unwrap_err();
        assert!(matches!(err, RoleSwitchError::RoleNotFound { .. }));
        assert!(bed.engine.current_session().await.is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_second_session() {
        let bed = bed(settings(0, 0)).await;
        bed.engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();
        let err = bed
            .engine
            .start_session(&bed.role_b.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RoleSwitchError::SessionAlreadyActive));
    }

    #[tokio::test]
    async fn test_end_without_session() {
        let bed = bed(settings(0, 0)).await;
        let err = bed.engine.end_session(None).await.unwrap_err();
        assert!(matches!(err, RoleSwitchError::NoActiveSession));
    }

    #[tokio::test]
    async fn test_notes_are_sanitized_and_blank_notes_dropped() {
        let bed = bed(settings(0, 0)).await;
        let err = bed.engine.add_session_note("anything").await.unwrap_err();
        assert!(matches!(err, RoleSwitchError::NoActiveSession));

        bed.engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();
        bed.engine
            .add_session_note("  <b>deep</b> work  ")
            .await
            .unwrap();
        bed.engine.add_session_note("   ").await.unwrap();
        let session = bed.engine.current_session().await.unwrap();
        assert_eq!(session.notes, vec!["bdeep/b work"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_blocks_end_until_it_expires() {
        let bed = bed(settings(300, 0)).await;
        bed.engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();

        let status = bed.engine.lock_status().await;
        assert!(status.is_locked);
        assert!(status.remaining_secs > 0 && status.remaining_secs <= 300);
        assert_eq!(status.role_id.as_deref(), Some(bed.role_a.id.as_str()));
        assert!(!status.can_override);

        let err = bed.engine.end_session(None).await.unwrap_err();
        match err {
            RoleSwitchError::SessionLocked { remaining_secs } => {
                assert!(remaining_secs > 0 && remaining_secs <= 300);
            }
            other => panic!("expected SessionLocked, got {other:?}"),
        }

        tokio::time::sleep(StdDuration::from_secs(301)).await;
        assert!(!bed.engine.lock_status().await.is_locked);
        bed.engine.end_session(None).await.unwrap();
        assert!(bed.engine.current_session().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_end_bypasses_lock() {
        let bed = bed(settings(300, 0)).await;
        assert!(bed.engine.force_end_session(None).await.unwrap().is_none());

        bed.engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();
        let closed = bed
            .engine
            .force_end_session(Some("fire drill"))
            .await
            .unwrap()
            .unwrap();
        assert!(!closed.is_active);
        assert!(closed.notes.contains(&"fire drill".to_string()));
        assert!(!bed.engine.state().await.is_locked);
        assert!(bed.engine.current_session().await.is_none());
        // The reason travels on the end event.
        let end_event = closed.events.last().unwrap();
        assert_eq!(end_event.kind, EventKind::End);
        assert_eq!(
            end_event.meta.as_ref().unwrap().note.as_deref(),
            Some("fire drill")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_defers_through_window_then_lands() {
        let bed = bed(settings(0, 30)).await;
        let first = bed
            .engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();

        let pending = bed
            .engine
            .switch_role(&bed.role_b.id, Some("standup"))
            .await
            .unwrap();
        // Window open: still the original session.
        assert_eq!(pending.id, first.id);
        assert_eq!(pending.role_id, bed.role_a.id);
        let status = bed.engine.transition_status().await;
        assert!(status.is_transitioning);
        assert!(status.can_cancel);
        assert_eq!(status.target_role_id.as_deref(), Some(bed.role_b.id.as_str()));
        assert!(status.remaining_secs > 0 && status.remaining_secs <= 30);

        tokio::time::sleep(StdDuration::from_secs(31)).await;

        let current = bed.engine.current_session().await.unwrap();
        assert_eq!(current.role_id, bed.role_b.id);
        assert_ne!(current.id, first.id);
        assert!(!bed.engine.state().await.is_in_transition);
        // The switch event is carried into the new session.
        assert_eq!(current.events.len(), 1);
        let switch = &current.events[0];
        assert_eq!(switch.kind, EventKind::Switch);
        assert_eq!(switch.role_id, bed.role_b.id);
        let meta = switch.meta.as_ref().unwrap();
        assert_eq!(meta.previous_role_id.as_deref(), Some(bed.role_a.id.as_str()));
        assert_eq!(meta.session_id.as_deref(), Some(first.id.as_str()));
        assert_eq!(meta.note.as_deref(), Some("standup"));

        let history = bed.store.history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, first.id);
        assert!(!history[0].is_active);
        assert_eq!(history[0].events.last().unwrap().kind, EventKind::Switch);
        assert!(history[0].notes.contains(&"standup".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_transition_keeps_current_session() {
        let bed = bed(settings(0, 30)).await;
        let first = bed
            .engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();
        bed.engine
            .switch_role(&bed.role_b.id, None)
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_secs(5)).await;
        bed.engine.cancel_transition().await.unwrap();

        let current = bed.engine.current_session().await.unwrap();
        assert_eq!(current.id, first.id);
        assert_eq!(current.role_id, bed.role_a.id);
        assert!(!bed.engine.state().await.is_in_transition);
        let cancel = current.events.last().unwrap();
        assert_eq!(cancel.kind, EventKind::CancelTransition);
        assert_eq!(cancel.role_id, bed.role_a.id);
        assert_eq!(
            cancel.meta.as_ref().unwrap().previous_role_id.as_deref(),
            Some(bed.role_b.id.as_str())
        );

        let err = bed.engine.cancel_transition().await.unwrap_err();
        assert!(matches!(err, RoleSwitchError::NoTransitionActive));

        // The original window elapsing later must not switch anything.
        tokio::time::sleep(StdDuration::from_secs(60)).await;
        let current = bed.engine.current_session().await.unwrap();
        assert_eq!(current.id, first.id);
        assert_eq!(current.role_id, bed.role_a.id);
        assert!(bed.store.history().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_switch_to_same_role_rejected() {
        let bed = bed(settings(0, 0)).await;
        bed.engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();
        let err = bed
            .engine
            .switch_role(&bed.role_a.id, None)
            .await
            .unwrap_err();
        match err {
            RoleSwitchError::SameRole { role_id } => assert_eq!(role_id, bed.role_a.id),
            other => panic!("expected SameRole, got {other:?}"),
        }
        assert!(!bed.engine.state().await.is_in_transition);
    }

    #[tokio::test]
    async fn test_switch_without_session_starts_one() {
        let bed = bed(settings(0, 30)).await;
        let session = bed
            .engine
            .switch_role(&bed.role_a.id, Some("first"))
            .await
            .unwrap();
        assert!(session.is_active);
        assert_eq!(session.role_id, bed.role_a.id);
        assert_eq!(session.events[0].kind, EventKind::Start);
        // No window applies when nothing was active.
        assert!(!bed.engine.state().await.is_in_transition);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_while_locked_rejected() {
        let bed = bed(settings(300, 30)).await;
        bed.engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();
        let err = bed
            .engine
            .switch_role(&bed.role_b.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RoleSwitchError::SessionLocked { .. }));
        assert!(!bed.engine.state().await.is_in_transition);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_during_transition_rejected() {
        let bed = bed(settings(0, 30)).await;
        bed.engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();
        bed.engine
            .switch_role(&bed.role_b.id, None)
            .await
            .unwrap();
        let err = bed
            .engine
            .switch_role(&bed.role_b.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RoleSwitchError::TransitionInProgress));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_window_switch_rearms_lock() {
        // With no window the switch is immediate, and the minimum
        // session lock re-arms on the switched-to session.
        let bed = bed(settings(300, 0)).await;
        bed.engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_secs(301)).await;
        assert!(!bed.engine.lock_status().await.is_locked);

        let fresh = bed
            .engine
            .switch_role(&bed.role_b.id, None)
            .await
            .unwrap();
        assert_eq!(fresh.role_id, bed.role_b.id);
        assert!(bed.engine.lock_status().await.is_locked);
        let err = bed.engine.end_session(None).await.unwrap_err();
        assert!(matches!(err, RoleSwitchError::SessionLocked { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_during_window_leaves_nothing_to_switch() {
        let bed = bed(settings(0, 30)).await;
        bed.engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();
        bed.engine
            .switch_role(&bed.role_b.id, None)
            .await
            .unwrap();
        bed.engine.end_session(None).await.unwrap();

        // The stale window also blocks fresh starts until it resolves.
        let err = bed
            .engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RoleSwitchError::TransitionInProgress));

        tokio::time::sleep(StdDuration::from_secs(31)).await;
        assert!(bed.engine.current_session().await.is_none());
        assert!(!bed.engine.state().await.is_in_transition);
        let history = bed.store.history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role_id, bed.role_a.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_updated_settings_apply_to_new_sessions() {
        let bed = bed(settings(0, 0)).await;
        bed.engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();
        assert!(!bed.engine.lock_status().await.is_locked);
        bed.engine.end_session(None).await.unwrap();

        bed.engine.update_settings(settings(300, 0)).await;
        bed.engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();
        assert!(bed.engine.lock_status().await.is_locked);
    }

    #[tokio::test]
    async fn test_notifications_follow_persistence() {
        let bed = bed(settings(0, 0)).await;
        let mut sessions = bed.engine.subscribe_sessions();
        let mut events = bed.engine.subscribe_events();

        let started = bed
            .engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Start);
        let notified = sessions.recv().await.unwrap().unwrap();
        assert_eq!(notified.id, started.id);
        // The write had already completed when the notification fired.
        assert_eq!(
            bed.store.load_current_session().await.unwrap().unwrap().id,
            started.id
        );

        bed.engine.end_session(None).await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::End);
        assert!(sessions.recv().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_ticks_while_active() {
        let bed = bed(settings(0, 0)).await;
        let mut timer = bed.engine.subscribe_timer();
        bed.engine
            .start_session(&bed.role_a.id, None)
            .await
            .unwrap();
        let tick = timer.recv().await.unwrap();
        assert!(tick.is_running);
        bed.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_session_state_is_kept_when_writes_fail() {
        // Unlike the role registry, session mutations do not roll back
        // on storage failure.
        let store = Arc::new(FlakySessionStore::default());
        let registry = Arc::new(RoleRegistry::new(Arc::new(MemoryStore::new())));
        let role = registry.create(draft("Focus")).await.unwrap();

        let engine = SessionEngine::new(store.clone(), registry, settings(0, 0));
        store.fail_next_writes();
        let err = engine.start_session(&role.id, None).await.unwrap_err();
        assert!(matches!(err, RoleSwitchError::Storage(_)));
        let current = engine.current_session().await.unwrap();
        assert_eq!(current.role_id, role.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_resumes_active_session() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(RoleRegistry::new(store.clone()));
        let role = registry.create(draft("Focus")).await.unwrap();

        let session = Session::begin(&role.id, Utc::now() - Duration::minutes(10));
        let state = EngineState::initial(session.start_time);
        store.seed(Some(state), Some(session.clone())).unwrap();

        let engine = SessionEngine::new(store.clone(), registry, settings(0, 0));
        engine.restore().await.unwrap();

        let current = engine.current_session().await.unwrap();
        assert_eq!(current.id, session.id);
        let timer = engine.timer_state().await;
        assert!(timer.is_running);
        assert!(timer.current_duration_ms >= 9 * 60 * 1000);
    }

    #[tokio::test]
    async fn test_restore_ignores_closed_saved_session() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(RoleRegistry::new(store.clone()));
        let role = registry.create(draft("Focus")).await.unwrap();

        let mut session = Session::begin(&role.id, Utc::now() - Duration::minutes(10));
        session.close(Utc::now() - Duration::minutes(5));
        store
            .seed(Some(EngineState::initial(Utc::now())), Some(session))
            .unwrap();

        let engine = SessionEngine::new(store.clone(), registry, settings(0, 0));
        engine.restore().await.unwrap();
        assert!(engine.current_session().await.is_none());
        assert!(!engine.timer_state().await.is_running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_clears_expired_lock() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(RoleRegistry::new(store.clone()));
        let role = registry.create(draft("Focus")).await.unwrap();

        let session = Session::begin(&role.id, Utc::now() - Duration::minutes(10));
        let mut state = EngineState::initial(session.start_time);
        state.arm_lock(Utc::now() - Duration::minutes(5));
        store.seed(Some(state), Some(session)).unwrap();

        let engine = SessionEngine::new(store.clone(), registry, settings(300, 0));
        engine.restore().await.unwrap();

        assert!(!engine.state().await.is_locked);
        engine.end_session(None).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_rearms_live_lock_for_remainder() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(RoleRegistry::new(store.clone()));
        let role = registry.create(draft("Focus")).await.unwrap();

        let session = Session::begin(&role.id, Utc::now() - Duration::seconds(298));
        let mut state = EngineState::initial(session.start_time);
        state.arm_lock(Utc::now() + Duration::seconds(2));
        store.seed(Some(state), Some(session)).unwrap();

        let engine = SessionEngine::new(store.clone(), registry, settings(300, 0));
        engine.restore().await.unwrap();
        assert!(engine.state().await.is_locked);
        assert!(matches!(
            engine.end_session(None).await.unwrap_err(),
            RoleSwitchError::SessionLocked { .. }
        ));

        tokio::time::sleep(StdDuration::from_secs(3)).await;
        assert!(!engine.state().await.is_locked);
        engine.end_session(None).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_completes_expired_transition() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(RoleRegistry::new(store.clone()));
        let role_a = registry.create(draft("Focus")).await.unwrap();
        let role_b = registry.create(draft("Meetings")).await.unwrap();

        let session = Session::begin(&role_a.id, Utc::now() - Duration::minutes(10));
        let mut state = EngineState::initial(session.start_time);
        state.begin_transition(&role_b.id, Utc::now() - Duration::seconds(20));
        store.seed(Some(state), Some(session.clone())).unwrap();

        let engine = SessionEngine::new(store.clone(), registry, settings(0, 30));
        engine.restore().await.unwrap();

        let current = engine.current_session().await.unwrap();
        assert_eq!(current.role_id, role_b.id);
        assert!(!engine.state().await.is_in_transition);
        let history = store.history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, session.id);
        assert_eq!(history[0].events.last().unwrap().kind, EventKind::Switch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_rearms_live_transition() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(RoleRegistry::new(store.clone()));
        let role_a = registry.create(draft("Focus")).await.unwrap();
        let role_b = registry.create(draft("Meetings")).await.unwrap();

        let session = Session::begin(&role_a.id, Utc::now() - Duration::seconds(25));
        let mut state = EngineState::initial(session.start_time);
        state.begin_transition(&role_b.id, Utc::now() + Duration::seconds(2));
        store.seed(Some(state), Some(session)).unwrap();

        let engine = SessionEngine::new(store.clone(), registry, settings(0, 30));
        engine.restore().await.unwrap();
        assert!(engine.state().await.is_in_transition);
        assert!(engine.transition_status().await.can_cancel);

        tokio::time::sleep(StdDuration::from_secs(3)).await;
        let current = engine.current_session().await.unwrap();
        assert_eq!(current.role_id, role_b.id);
        assert!(!engine.state().await.is_in_transition);
    }
}
