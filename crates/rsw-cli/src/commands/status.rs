//! Implementation of the `rsw status` command.

use std::io::Write;

use anyhow::Result;
use serde::Serialize;

use rsw_core::{LockStatus, Role, RoleLookup, Session, TimerState, TransitionStatus};

use crate::App;
use crate::commands::util::{format_clock, format_duration, format_secs};

/// Everything `--json` emits in one object.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload {
    session: Option<Session>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
    timer: TimerState,
    lock: LockStatus,
    transition: TransitionStatus,
}

pub async fn run<W: Write>(writer: &mut W, app: &App, json: bool) -> Result<()> {
    let session = app.engine().current_session().await;
    let timer = app.engine().timer_state().await;
    let lock = app.engine().lock_status().await;
    let transition = app.engine().transition_status().await;
    let role = session
        .as_ref()
        .and_then(|s| app.registry().role(&s.role_id));
    let target = transition
        .target_role_id
        .as_deref()
        .map(|id| app.registry().role(id).map_or_else(|| id.to_string(), |r| r.name));

    if json {
        let payload = StatusPayload {
            session,
            role,
            timer,
            lock,
            transition,
        };
        serde_json::to_writer_pretty(&mut *writer, &payload)?;
        writeln!(writer)?;
        return Ok(());
    }

    let output = format_status(
        session.as_ref(),
        role.as_ref().map(|r| r.name.as_str()),
        &timer,
        &lock,
        &transition,
        target.as_deref(),
    );
    write!(writer, "{output}")?;
    Ok(())
}

/// Human-readable status block.
fn format_status(
    session: Option<&Session>,
    role_name: Option<&str>,
    timer: &TimerState,
    lock: &LockStatus,
    transition: &TransitionStatus,
    transition_target: Option<&str>,
) -> String {
    use std::fmt::Write;

    let Some(session) = session else {
        return "No active session\n".to_string();
    };

    let mut output = String::new();
    let role = role_name.unwrap_or(session.role_id.as_str());
    writeln!(output, "Role: {role}").unwrap();
    writeln!(output, "Started: {}", format_clock(session.start_time)).unwrap();
    writeln!(output, "Elapsed: {}", format_duration(timer.current_duration_ms)).unwrap();
    if !session.notes.is_empty() {
        writeln!(output, "Notes: {}", session.notes.len()).unwrap();
    }
    if lock.is_locked {
        writeln!(
            output,
            "Locked for another {}",
            format_secs(lock.remaining_secs)
        )
        .unwrap();
    }
    if transition.is_transitioning {
        let target = transition_target.unwrap_or("?");
        writeln!(
            output,
            "Switching to {target} in {} ('rsw cancel' to abort)",
            format_secs(transition.remaining_secs)
        )
        .unwrap();
    }
    output
}
