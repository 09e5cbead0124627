//! Subcommand implementations, one module per `box-cli` arg struct (spec
//! §6 "CLI surface"). Grounded on `youki::commands`'s per-subcommand module
//! split and its `load_container`-style helper.

pub mod exec;
pub mod kill;
pub mod list;
pub mod run;

use std::path::Path;

use box_container::status::StatusDirectory;
use box_container::Orchestrator;

pub(crate) fn orchestrator_for(root: &Path, container_id: &str) -> anyhow::Result<Orchestrator> {
    let status_dir = StatusDirectory::open(root)?;
    Ok(Orchestrator::for_existing(container_id, status_dir))
}
