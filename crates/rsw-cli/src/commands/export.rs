//! Implementation of the `rsw export` command.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::App;

/// Writes the full data set as a JSON bundle, to stdout by default.
pub async fn run<W: Write>(writer: &mut W, app: &App, output: Option<&Path>) -> Result<()> {
    let settings = app.engine().settings().await;
    let bundle = app
        .store()
        .export_bundle(Some(settings), Utc::now())
        .await
        .context("failed to collect export bundle")?;
    let json = serde_json::to_string_pretty(&bundle).context("failed to serialize bundle")?;

    match output {
        Some(path) => {
            fs::write(path, format!("{json}\n"))
                .with_context(|| format!("failed to write {}", path.display()))?;
            writeln!(
                writer,
                "Exported {} roles, {} sessions, {} events to {}",
                bundle.roles.len(),
                bundle.sessions.len(),
                bundle.events.len(),
                path.display()
            )?;
        }
        None => writeln!(writer, "{json}")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use rsw_core::EngineSettings;
    use rsw_db::{BUNDLE_VERSION, Database};

    async fn test_app() -> App {
        let db = Database::open_in_memory().unwrap();
        let settings = EngineSettings {
            minimum_session_secs: 0,
            transition_window_secs: 0,
        };
        App::with_database(db, settings).await.unwrap()
    }

    #[tokio::test]
    async fn test_export_to_stdout_is_valid_json() {
        let app = test_app().await;
        let dev = app.require_role("Development").unwrap();
        app.engine().start_session(&dev.id, None).await.unwrap();
        app.engine().end_session(None).await.unwrap();

        let mut output = Vec::new();
        run(&mut output, &app, None).await.unwrap();

        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["version"], serde_json::json!(BUNDLE_VERSION));
        assert_eq!(value["roles"].as_array().unwrap().len(), 4);
        assert_eq!(value["sessions"].as_array().unwrap().len(), 1);
        assert!(value["settings"].is_object());
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_export_to_file_reports_counts() {
        let app = test_app().await;
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("bundle.json");

        let mut output = Vec::new();
        run(&mut output, &app, Some(&path)).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.starts_with("Exported 4 roles, 0 sessions, 0 events to "));
        let written = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["version"], serde_json::json!(BUNDLE_VERSION));
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_export_includes_the_active_session() {
        let app = test_app().await;
        let dev = app.require_role("Development").unwrap();
        app.engine().start_session(&dev.id, None).await.unwrap();

        let mut output = Vec::new();
        run(&mut output, &app, None).await.unwrap();

        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        let sessions = value["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["isActive"], serde_json::json!(true));
        app.shutdown().await;
    }
}
