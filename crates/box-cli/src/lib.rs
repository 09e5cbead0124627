//! Argument structs for the `linyaps-box` subcommands, one `clap`-derived
//! struct per operation the orchestrator exposes (spec §6 "CLI surface").

mod exec;
mod kill;
mod list;
mod run;

pub use exec::{ExecArgs, UserSpec};
pub use kill::KillArgs;
pub use list::{ListArgs, ListFormat};
pub use run::RunArgs;
