//! Implementation of the `rsw end` command.

use std::io::Write;

use anyhow::{Result, bail};

use rsw_core::{RoleLookup, RoleSwitchError, Session};

use crate::App;
use crate::commands::util::{format_duration, format_secs};

/// Ends the active session, forcing through the lock when asked.
pub async fn run<W: Write>(
    writer: &mut W,
    app: &App,
    note: Option<&str>,
    force: bool,
) -> Result<()> {
    let session = if force {
        match app.engine().force_end_session(note).await? {
            Some(session) => session,
            None => {
                writeln!(writer, "No active session")?;
                return Ok(());
            }
        }
    } else {
        match app.engine().end_session(note).await {
            Ok(session) => session,
            Err(RoleSwitchError::SessionLocked { remaining_secs }) => {
                bail!(
                    "session is locked for another {}; --force ends it anyway",
                    format_secs(remaining_secs)
                )
            }
            Err(err) => return Err(err.into()),
        }
    };

    writeln!(writer, "{}", summary(app, &session))?;
    Ok(())
}

/// One-line closing summary, e.g. "Ended Development after 2h 15m".
fn summary(app: &App, session: &Session) -> String {
    let name = app
        .registry()
        .role(&session.role_id)
        .map_or_else(|| session.role_id.clone(), |role| role.name);
    format!(
        "Ended {name} after {}",
        format_duration(session.duration_ms.unwrap_or(0))
    )
}
