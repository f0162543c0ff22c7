//! Implementation of the `rsw start` command.

use std::io::Write;

use anyhow::{Result, bail};

use rsw_core::RoleSwitchError;

use crate::App;
use crate::commands::util::{format_clock, format_secs};

/// Starts a session in the given role (name or id).
pub async fn run<W: Write>(
    writer: &mut W,
    app: &App,
    role: &str,
    note: Option<&str>,
) -> Result<()> {
    let role = app.require_role(role)?;

    let session = match app.engine().start_session(&role.id, note).await {
        Ok(session) => session,
        Err(RoleSwitchError::SessionAlreadyActive) => {
            bail!("a session is already active; 'rsw switch' changes role, 'rsw end' closes it")
        }
        Err(err) => return Err(err.into()),
    };

    writeln!(
        writer,
        "Started {} at {}",
        role.name,
        format_clock(session.start_time)
    )?;
    let lock = app.engine().lock_status().await;
    if lock.is_locked {
        writeln!(writer, "Locked for {}", format_secs(lock.remaining_secs))?;
    }
    Ok(())
}
