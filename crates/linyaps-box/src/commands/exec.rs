//! `exec` subcommand (spec §6 "exec <id> <cmd> [args…]"). Grounded on
//! `youki::commands::exec`, adapted to `box_container::Orchestrator::exec`.

use std::path::Path;

use anyhow::Result;
use box_cli::ExecArgs;

use super::orchestrator_for;

pub fn exec(args: ExecArgs, root: &Path) -> Result<i32> {
    let orchestrator = orchestrator_for(root, &args.container_id)?;
    let user = args.user.map(|u| (u.uid, u.gid));
    Ok(orchestrator.exec(&args.command, args.cwd.as_deref(), user)?)
}
