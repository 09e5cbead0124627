//! `run` subcommand (spec §6 "run <id>"). Grounded on `youki::commands::run`,
//! adapted to build a `RuntimeConfig` via `box_container::config` instead of
//! handing a raw `oci_spec::Spec` to `libcontainer`.

use std::path::Path;

use anyhow::{Context, Result};
use box_cli::RunArgs;
use box_container::cgroup::CgroupManagerKind;
use box_container::config::RuntimeConfig;
use box_container::status::StatusDirectory;
use box_container::Orchestrator;
use oci_spec::runtime::Spec;

pub fn run(args: RunArgs, root: &Path, cgroup_manager: CgroupManagerKind) -> Result<i32> {
    let config_path = args.bundle.join(&args.config);
    let spec = Spec::load(&config_path).with_context(|| format!("failed to load {config_path:?}"))?;
    let config = RuntimeConfig::from_spec(&spec, &args.bundle)?;

    let status_dir = StatusDirectory::open(root)?;
    let orchestrator = Orchestrator::new(&args.container_id, &args.bundle, config, status_dir)?;
    let cgroup = box_container::cgroup::resolve(cgroup_manager)?;
    Ok(orchestrator.run(cgroup.as_ref())?)
}
