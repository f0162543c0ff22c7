//! Implementation of the `rsw import` command.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use rsw_db::ExportBundle;

use crate::App;

/// Replaces the database contents with a previously exported bundle.
///
/// The engine in this process keeps its pre-import view; the next
/// invocation restores whatever the bundle brought in.
pub async fn run<W: Write>(writer: &mut W, app: &App, file: &Path) -> Result<()> {
    let text =
        fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let bundle: ExportBundle = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid export bundle", file.display()))?;

    let stats = app
        .store()
        .import_bundle(&bundle)
        .await
        .context("import failed")?;

    writeln!(
        writer,
        "Imported {} roles, {} sessions, {} events",
        stats.roles, stats.sessions, stats.events
    )?;
    if stats.restored_active_session {
        writeln!(writer, "Restored an active session; 'rsw status' shows it")?;
    }
    Ok(())
}
