//! CLI subcommand implementations.

pub mod cancel;
pub mod end;
pub mod export;
pub mod import;
pub mod note;
pub mod report;
pub mod role;
pub mod start;
pub mod status;
pub mod switch;
pub mod util;
pub mod watch;
