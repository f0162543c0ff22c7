//! Role switcher CLI library.
//!
//! This crate provides the `rsw` command-line interface over the
//! `rsw-core` engine and the `rsw-db` store.

mod app;
mod cli;
pub mod commands;
mod config;

pub use app::App;
pub use cli::{Cli, Commands, PeriodArg, RoleCommand};
pub use config::Config;
