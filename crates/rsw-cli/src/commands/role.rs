//! Implementation of the `rsw role` subcommands.

use std::io::Write;

use anyhow::{Context, Result, bail};
use chrono::{Local, Utc};

use rsw_core::role::ROLE_COLOR_PALETTE;
use rsw_core::{Role, RoleDraft, RoleLookup, Session, analytics};

use crate::App;
use crate::cli::RoleCommand;
use crate::commands::util::format_duration;

pub async fn run<W: Write>(writer: &mut W, app: &App, action: RoleCommand) -> Result<()> {
    match action {
        RoleCommand::Create {
            name,
            color,
            description,
            icon,
        } => create(writer, app, name, color, description, icon).await,
        RoleCommand::List { json } => list(writer, app, json),
        RoleCommand::Show { role } => show(writer, app, &role).await,
        RoleCommand::Edit {
            role,
            name,
            color,
            description,
            icon,
        } => edit(writer, app, &role, name, color, description, icon).await,
        RoleCommand::Delete { role } => delete(writer, app, &role).await,
        RoleCommand::Duplicate { role } => duplicate(writer, app, &role).await,
        RoleCommand::Search { query } => search(writer, app, &query),
    }
}

async fn create<W: Write>(
    writer: &mut W,
    app: &App,
    name: String,
    color: Option<String>,
    description: Option<String>,
    icon: Option<String>,
) -> Result<()> {
    let color = color.unwrap_or_else(|| next_palette_color(&app.registry().roles()));
    let draft = RoleDraft {
        name,
        color_hex: color,
        description,
        icon,
    };
    let role = app.registry().create(draft).await?;
    writeln!(writer, "Created {} ({})", role.name, role.color_hex)?;
    Ok(())
}

/// Cycles through the palette by role count, so consecutive creates
/// without an explicit color stay distinguishable.
fn next_palette_color(roles: &[Role]) -> String {
    ROLE_COLOR_PALETTE[roles.len() % ROLE_COLOR_PALETTE.len()].to_string()
}

fn list<W: Write>(writer: &mut W, app: &App, json: bool) -> Result<()> {
    let roles = app.registry().roles();
    if json {
        serde_json::to_writer_pretty(&mut *writer, &roles)?;
        writeln!(writer)?;
        return Ok(());
    }

    if roles.is_empty() {
        writeln!(writer, "No roles defined.")?;
        return Ok(());
    }
    writeln!(writer, "Roles:")?;
    for role in roles {
        match &role.description {
            Some(description) => {
                writeln!(writer, "- {} ({}): {description}", role.name, role.color_hex)?;
            }
            None => writeln!(writer, "- {} ({})", role.name, role.color_hex)?,
        }
    }
    Ok(())
}

async fn show<W: Write>(writer: &mut W, app: &App, identifier: &str) -> Result<()> {
    let role = app.require_role(identifier)?;
    let mut sessions: Vec<Session> = app
        .store()
        .sessions()
        .await
        .context("failed to load session history")?
        .into_iter()
        .filter(|s| s.role_id == role.id)
        .collect();
    if let Some(current) = app.engine().current_session().await
        && current.role_id == role.id
    {
        sessions.push(current);
    }

    writeln!(writer, "{} ({})", role.name, role.color_hex)?;
    if let Some(description) = &role.description {
        writeln!(writer, "Description: {description}")?;
    }
    if let Some(icon) = &role.icon {
        writeln!(writer, "Icon: {icon}")?;
    }
    writeln!(
        writer,
        "Created: {}",
        role.created_at.with_timezone(&Local).format("%Y-%m-%d")
    )?;

    let now = Utc::now();
    writeln!(writer, "Sessions: {}", sessions.len())?;
    if !sessions.is_empty() {
        let total = analytics::total_duration_ms(&sessions, now);
        let count = i64::try_from(sessions.len()).unwrap_or(1);
        writeln!(writer, "Total time: {}", format_duration(total))?;
        writeln!(writer, "Average: {}", format_duration(total / count))?;
        if let Some(last) = sessions.iter().map(|s| s.start_time).max() {
            writeln!(
                writer,
                "Last used: {}",
                last.with_timezone(&Local).format("%Y-%m-%d")
            )?;
        }
    }
    Ok(())
}

async fn edit<W: Write>(
    writer: &mut W,
    app: &App,
    identifier: &str,
    name: Option<String>,
    color: Option<String>,
    description: Option<String>,
    icon: Option<String>,
) -> Result<()> {
    if name.is_none() && color.is_none() && description.is_none() && icon.is_none() {
        bail!("nothing to change; pass --name, --color, --description, or --icon");
    }
    let role = app.require_role(identifier)?;
    // An explicit empty string clears the optional fields; absent flags
    // keep the stored values.
    let draft = RoleDraft {
        name: name.unwrap_or_else(|| role.name.clone()),
        color_hex: color.unwrap_or_else(|| role.color_hex.clone()),
        description: description.or_else(|| role.description.clone()),
        icon: icon.or_else(|| role.icon.clone()),
    };
    let updated = app.registry().update(&role.id, draft).await?;
    writeln!(writer, "Updated {}", updated.name)?;
    Ok(())
}

async fn delete<W: Write>(writer: &mut W, app: &App, identifier: &str) -> Result<()> {
    let role = app.require_role(identifier)?;
    if let Some(current) = app.engine().current_session().await
        && current.role_id == role.id
    {
        bail!(
            "{} has the active session; end or switch it first",
            role.name
        );
    }
    let removed = app.registry().remove(&role.id).await?;
    writeln!(writer, "Deleted {} (history kept)", removed.name)?;
    Ok(())
}

async fn duplicate<W: Write>(writer: &mut W, app: &App, identifier: &str) -> Result<()> {
    let role = app.require_role(identifier)?;
    let copy = app.registry().duplicate(&role.id).await?;
    writeln!(writer, "Created {}", copy.name)?;
    Ok(())
}

fn search<W: Write>(writer: &mut W, app: &App, query: &str) -> Result<()> {
    let matches = app.registry().search(query);
    if matches.is_empty() {
        writeln!(writer, "No roles match {query:?}")?;
        return Ok(());
    }
    for role in matches {
        writeln!(writer, "- {} ({})", role.name, role.color_hex)?;
    }
    Ok(())
}
