//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

/// Role-based session tracker.
///
/// Tracks which role you are working in (Development, Learning, ...),
/// enforces a minimum session duration, and runs switches through a
/// cancellable transition window.
#[derive(Debug, Parser)]
#[command(name = "rsw", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a session in a role.
    Start {
        /// Role name or id.
        role: String,

        /// Note to attach to the new session.
        #[arg(long)]
        note: Option<String>,
    },

    /// End the active session.
    End {
        /// Note to attach before closing.
        #[arg(long)]
        note: Option<String>,

        /// End the session even while it is locked.
        #[arg(long)]
        force: bool,
    },

    /// Switch the active session to another role.
    Switch {
        /// Role name or id to switch to.
        role: String,

        /// Note carried onto the switch.
        #[arg(long)]
        note: Option<String>,
    },

    /// Cancel a pending role transition.
    Cancel,

    /// Append a note to the active session.
    Note {
        /// Note text.
        text: String,
    },

    /// Show the current session, lock, and transition state.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage roles.
    Role {
        #[command(subcommand)]
        action: RoleCommand,
    },

    /// Show an analytics report.
    Report {
        /// Reporting period ending today.
        #[arg(long, value_enum, default_value_t = PeriodArg::Today, conflicts_with_all = ["from", "to"])]
        period: PeriodArg,

        /// First day of a custom range (YYYY-MM-DD).
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// Last day of a custom range (YYYY-MM-DD), inclusive.
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Write all stored data as a JSON bundle.
    Export {
        /// Write the bundle to a file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Load a previously exported bundle.
    Import {
        /// Bundle file to read.
        file: PathBuf,
    },

    /// Follow engine notifications until interrupted.
    Watch,
}

/// Role registry operations.
#[derive(Debug, Subcommand)]
pub enum RoleCommand {
    /// Create a role.
    Create {
        /// Role name, unique case-insensitively.
        name: String,

        /// Display color (#RGB or #RRGGBB); defaults to the next
        /// palette color.
        #[arg(long)]
        color: Option<String>,

        /// Free-text description.
        #[arg(long)]
        description: Option<String>,

        /// Icon name.
        #[arg(long)]
        icon: Option<String>,
    },

    /// List all roles.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show one role with its usage statistics.
    Show {
        /// Role name or id.
        role: String,
    },

    /// Edit a role's fields.
    Edit {
        /// Role name or id.
        role: String,

        /// New name.
        #[arg(long)]
        name: Option<String>,

        /// New display color.
        #[arg(long)]
        color: Option<String>,

        /// New description; an empty string clears it.
        #[arg(long)]
        description: Option<String>,

        /// New icon; an empty string clears it.
        #[arg(long)]
        icon: Option<String>,
    },

    /// Delete a role. Past sessions keep their history.
    Delete {
        /// Role name or id.
        role: String,
    },

    /// Copy a role under "<name> (Copy)".
    Duplicate {
        /// Role name or id.
        role: String,
    },

    /// Find roles by name or description.
    Search {
        /// Case-insensitive text to look for.
        query: String,
    },
}

/// Report period ending today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PeriodArg {
    /// Today only.
    Today,
    /// The last 7 days.
    Week,
    /// The last 30 days.
    Month,
}
