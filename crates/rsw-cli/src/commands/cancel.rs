//! Implementation of the `rsw cancel` command.

use std::io::Write;

use anyhow::{Result, bail};

use rsw_core::{RoleLookup, RoleSwitchError};

use crate::App;

/// Cancels the pending transition, keeping the current session.
pub async fn run<W: Write>(writer: &mut W, app: &App) -> Result<()> {
    let transition = app.engine().transition_status().await;
    match app.engine().cancel_transition().await {
        Ok(()) => {}
        Err(RoleSwitchError::NoTransitionActive) => bail!("no transition to cancel"),
        Err(err) => return Err(err.into()),
    }

    let target = transition
        .target_role_id
        .map(|id| app.registry().role(&id).map_or(id, |role| role.name));
    match target {
        Some(target) => writeln!(writer, "Cancelled switch to {target}")?,
        None => writeln!(writer, "Cancelled switch")?,
    }
    if let Some(session) = app.engine().current_session().await {
        let name = app
            .registry()
            .role(&session.role_id)
            .map_or(session.role_id, |role| role.name);
        writeln!(writer, "Still in {name}")?;
    }
    Ok(())
}
