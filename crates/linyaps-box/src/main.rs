//! `linyaps-box`: an OCI-compatible rootless-capable container runtime for
//! Linux desktop sandboxing (spec §6 "CLI surface"). Grounded on `youki`'s
//! binary crate structure, narrowed to the four subcommands the spec names.

mod commands;
mod logger;
mod rootpath;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use box_container::cgroup::CgroupManagerKind;
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(version, author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    /// Directory holding per-container status files. Defaults to
    /// `$XDG_RUNTIME_DIR/linglong/box` (or a uid-scoped `/tmp` fallback).
    #[clap(long, global = true)]
    root: Option<PathBuf>,
    /// Cgroup manager to use for resource accounting.
    #[clap(long, global = true, default_value = "disabled")]
    cgroup_manager: CgroupManagerKind,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser, Debug)]
enum SubCommand {
    Run(box_cli::RunArgs),
    Exec(box_cli::ExecArgs),
    List(box_cli::ListArgs),
    Kill(box_cli::KillArgs),
}

/// This is the entry point of the container runtime. The binary is run by a
/// high-level container manager with various flags passed.
fn main() -> Result<ExitCode> {
    // A malicious container can gain access to the host machine by modifying
    // this binary on disk and infecting it with malicious code (CVE-2019-5736).
    // The fix is to copy /proc/self/exe into an anonymous, sealed memfd and
    // re-exec from there; this must happen before anything else runs.
    pentacle::ensure_sealed().context("failed to seal /proc/self/exe")?;

    if let Err(e) = logger::init() {
        eprintln!("log init failed: {e:?}");
    }

    let opts = Opts::parse();
    tracing::debug!(euid = %nix::unistd::geteuid(), args = ?std::env::args_os(), "started");

    let root = rootpath::determine(opts.root)?;

    let result = match opts.subcmd {
        SubCommand::Run(args) => commands::run::run(args, &root, opts.cgroup_manager).map(exit_from_code),
        SubCommand::Exec(args) => commands::exec::exec(args, &root).map(exit_from_code),
        SubCommand::List(args) => commands::list::list(args, &root).map(|()| ExitCode::SUCCESS),
        SubCommand::Kill(args) => commands::kill::kill(args, &root).map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => Ok(code),
        Err(e) => {
            eprintln!("Error: {e:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// A container's own init exit status (0-255, or `128 + signo` on
/// signal-termination per spec §6 "Exit codes") becomes this process's exit
/// code directly; any runtime failure before `exec` is reported separately
/// as `ExitCode::FAILURE` by the caller.
fn exit_from_code(code: i32) -> ExitCode {
    ExitCode::from(clamp_to_u8(code))
}

fn clamp_to_u8(code: i32) -> u8 {
    code.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_from_code_clamps_out_of_range_values() {
        assert_eq!(clamp_to_u8(-1), 0);
        assert_eq!(clamp_to_u8(300), 255);
        assert_eq!(clamp_to_u8(137), 137);
    }
}
