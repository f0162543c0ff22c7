//! Implementation of the `rsw switch` command.
//!
//! A switch can land three ways: through a transition window (the
//! default), immediately when the window is configured to zero, or as a
//! plain start when nothing was active. The output says which happened.

use std::io::Write;

use anyhow::{Result, bail};

use rsw_core::{RoleLookup, RoleSwitchError};

use crate::App;
use crate::commands::util::{format_clock, format_secs};

pub async fn run<W: Write>(
    writer: &mut W,
    app: &App,
    role: &str,
    note: Option<&str>,
) -> Result<()> {
    let role = app.require_role(role)?;
    let previous = app.engine().current_session().await;

    let session = match app.engine().switch_role(&role.id, note).await {
        Ok(session) => session,
        Err(RoleSwitchError::SameRole { .. }) => {
            bail!("already in {}", role.name)
        }
        Err(RoleSwitchError::SessionLocked { remaining_secs }) => {
            bail!(
                "session is locked for another {}; 'rsw end --force' breaks the lock",
                format_secs(remaining_secs)
            )
        }
        Err(err) => return Err(err.into()),
    };

    let transition = app.engine().transition_status().await;
    if transition.is_transitioning {
        writeln!(
            writer,
            "Switching to {} in {} ('rsw cancel' to abort)",
            role.name,
            format_secs(transition.remaining_secs)
        )?;
    } else if let Some(previous) = previous {
        let from = app
            .registry()
            .role(&previous.role_id)
            .map_or(previous.role_id, |role| role.name);
        writeln!(writer, "Switched from {from} to {}", role.name)?;
    } else {
        writeln!(
            writer,
            "Started {} at {}",
            role.name,
            format_clock(session.start_time)
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use rsw_core::EngineSettings;
    use rsw_db::Database;

    async fn test_app(transition_window_secs: u32) -> App {
        let db = Database::open_in_memory().unwrap();
        let settings = EngineSettings {
            minimum_session_secs: 0,
            transition_window_secs,
        };
        App::with_database(db, settings).await.unwrap()
    }

    #[tokio::test]
    async fn test_switch_with_window_announces_countdown() {
        let app = test_app(30).await;
        let dev = app.require_role("Development").unwrap();
        app.engine().start_session(&dev.id, None).await.unwrap();

        let mut output = Vec::new();
        run(&mut output, &app, "Learning", None).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("Switching to Learning in 30s"));
        assert!(output.contains("rsw cancel"));
        // Still the pre-switch session until the window elapses.
        let session = app.engine().current_session().await.unwrap();
        assert_eq!(session.role_id, dev.id);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_window_switch_is_immediate() {
        let app = test_app(0).await;
        let dev = app.require_role("Development").unwrap();
        app.engine().start_session(&dev.id, None).await.unwrap();

        let mut output = Vec::new();
        run(&mut output, &app, "Learning", None).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_eq!(output, "Switched from Development to Learning\n");
        let session = app.engine().current_session().await.unwrap();
        assert_eq!(session.role_id, app.require_role("Learning").unwrap().id);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_switch_without_session_starts_one() {
        let app = test_app(30).await;
        let mut output = Vec::new();
        run(&mut output, &app, "Planning", None).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.starts_with("Started Planning at "));
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_switch_to_active_role_fails() {
        let app = test_app(0).await;
        let dev = app.require_role("Development").unwrap();
        app.engine().start_session(&dev.id, None).await.unwrap();

        let mut output = Vec::new();
        let err = run(&mut output, &app, "Development", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "already in Development");
        app.shutdown().await;
    }
}
