//! Implementation of the `rsw note` command.

use std::io::Write;

use anyhow::{Result, bail};

use rsw_core::{RoleLookup, RoleSwitchError};

use crate::App;

/// Appends a note to the active session. Notes are accepted even while
/// the session is locked.
pub async fn run<W: Write>(writer: &mut W, app: &App, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        bail!("note text is empty");
    }
    match app.engine().add_session_note(text).await {
        Ok(()) => {}
        Err(RoleSwitchError::NoActiveSession) => {
            bail!("no active session to attach the note to")
        }
        Err(err) => return Err(err.into()),
    }

    let session = app.engine().current_session().await;
    let name = session.map_or_else(String::new, |s| {
        app.registry()
            .role(&s.role_id)
            .map_or(s.role_id, |role| role.name)
    });
    writeln!(writer, "Note added to {name}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use rsw_core::EngineSettings;
    use rsw_db::Database;

    async fn test_app() -> App {
        let db = Database::open_in_memory().unwrap();
        let settings = EngineSettings {
            minimum_session_secs: 300,
            transition_window_secs: 0,
        };
        App::with_database(db, settings).await.unwrap()
    }

    #[tokio::test]
    async fn test_note_lands_on_active_session_even_locked() {
        let app = test_app().await;
        let dev = app.require_role("Development").unwrap();
        app.engine().start_session(&dev.id, None).await.unwrap();

        let mut output = Vec::new();
        run(&mut output, &app, "debugging the flaky test")
            .await
            .unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Note added to Development\n"
        );
        let session = app.engine().current_session().await.unwrap();
        assert_eq!(session.notes, ["debugging the flaky test"]);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_note_without_session_fails() {
        let app = test_app().await;
        let mut output = Vec::new();
        let err = run(&mut output, &app, "orphan note").await.unwrap_err();
        assert!(err.to_string().contains("no active session"));
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_blank_note_is_rejected() {
        let app = test_app().await;
        let dev = app.require_role("Development").unwrap();
        app.engine().start_session(&dev.id, None).await.unwrap();

        let mut output = Vec::new();
        let err = run(&mut output, &app, "   ").await.unwrap_err();
        assert_eq!(err.to_string(), "note text is empty");
        app.shutdown().await;
    }
}
