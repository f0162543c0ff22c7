//! Implementation of the `rsw watch` command.
//!
//! Subscribes to the engine's broadcast channels and prints one line
//! per notification until Ctrl-C. Timer ticks arrive once a second
//! while a session is active; lock expiry and transition completion
//! fire on their own deadlines.

use std::io::Write;

use anyhow::Result;
use chrono::Local;
use tokio::sync::broadcast::error::RecvError;

use rsw_core::{EngineState, RoleLookup, Session, SessionEvent, TimerState};

use crate::App;
use crate::commands::util::{format_clock, format_duration};

pub async fn run<W: Write>(writer: &mut W, app: &App) -> Result<()> {
    let mut sessions = app.engine().subscribe_sessions();
    let mut states = app.engine().subscribe_state();
    let mut timers = app.engine().subscribe_timer();
    let mut events = app.engine().subscribe_events();

    writeln!(writer, "Watching engine notifications (Ctrl-C to stop)")?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => break,
            changed = sessions.recv() => match changed {
                Ok(session) => describe_session(session.as_ref(), app),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            changed = states.recv() => match changed {
                Ok(state) => describe_state(&state, app),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            tick = timers.recv() => match tick {
                Ok(timer) => describe_timer(&timer),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(event) => describe_event(&event, app),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        };
        writeln!(writer, "{}  {line}", Local::now().format("%H:%M:%S"))?;
        writer.flush()?;
    }
    Ok(())
}

fn role_name(app: &App, id: &str) -> String {
    app.registry()
        .role(id)
        .map_or_else(|| id.to_string(), |role| role.name)
}

fn describe_session(session: Option<&Session>, app: &App) -> String {
    session.map_or_else(
        || "session  ended".to_string(),
        |session| format!("session  {}", role_name(app, &session.role_id)),
    )
}

fn describe_state(state: &EngineState, app: &App) -> String {
    if state.is_locked {
        let until = state.lock_end_time.map_or_else(String::new, format_clock);
        format!("state    locked until {until}")
    } else if state.is_in_transition {
        let target = state
            .transition_target_role_id
            .as_deref()
            .map_or_else(String::new, |id| role_name(app, id));
        let until = state
            .transition_end_time
            .map_or_else(String::new, format_clock);
        format!("state    switching to {target} until {until}")
    } else {
        "state    idle".to_string()
    }
}

fn describe_timer(timer: &TimerState) -> String {
    if timer.is_running {
        format!("timer    {}", format_duration(timer.current_duration_ms))
    } else {
        "timer    idle".to_string()
    }
}

fn describe_event(event: &SessionEvent, app: &App) -> String {
    format!("event    {} {}", event.kind, role_name(app, &event.role_id))
}
