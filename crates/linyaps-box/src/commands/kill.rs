//! `kill` subcommand (spec §6 "kill <id> [SIGNAL]"). Grounded on
//! `youki::commands::kill`, adapted to `box_container::Orchestrator::kill`.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use box_cli::KillArgs;
use nix::sys::signal::Signal;

use super::orchestrator_for;

const DEFAULT_SIGNAL: Signal = Signal::SIGTERM;

pub fn kill(args: KillArgs, root: &Path) -> Result<()> {
    let signal = match args.signal {
        Some(raw) => parse_signal(&raw)?,
        None => DEFAULT_SIGNAL,
    };
    let orchestrator = orchestrator_for(root, &args.container_id)?;
    Ok(orchestrator.kill(signal)?)
}

fn parse_signal(raw: &str) -> Result<Signal> {
    if let Ok(n) = raw.parse::<i32>() {
        return Signal::try_from(n).with_context(|| format!("invalid signal number {n}"));
    }
    let name = raw.strip_prefix("SIG").unwrap_or(raw);
    Signal::from_str(&format!("SIG{}", name.to_uppercase())).with_context(|| format!("invalid signal name {raw:?}"))
}
