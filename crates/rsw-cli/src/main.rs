use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rsw_cli::commands::{
    cancel, end, export, import, note, report, role, start, status, switch, watch,
};
use rsw_cli::{App, Cli, Commands, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    let app = App::open(&config).await?;

    let stdout = std::io::stdout();
    let mut writer = stdout.lock();

    let result = match command {
        Commands::Start { role, note } => {
            start::run(&mut writer, &app, &role, note.as_deref()).await
        }
        Commands::End { note, force } => end::run(&mut writer, &app, note.as_deref(), force).await,
        Commands::Switch { role, note } => {
            switch::run(&mut writer, &app, &role, note.as_deref()).await
        }
        Commands::Cancel => cancel::run(&mut writer, &app).await,
        Commands::Note { text } => note::run(&mut writer, &app, &text).await,
        Commands::Status { json } => status::run(&mut writer, &app, json).await,
        Commands::Role { action } => role::run(&mut writer, &app, action).await,
        Commands::Report {
            period,
            from,
            to,
            json,
        } => report::run(&mut writer, &app, period, from, to, json).await,
        Commands::Export { output } => export::run(&mut writer, &app, output.as_deref()).await,
        Commands::Import { file } => import::run(&mut writer, &app, &file).await,
        Commands::Watch => watch::run(&mut writer, &app).await,
    };

    app.shutdown().await;
    result
}
