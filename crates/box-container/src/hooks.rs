//! Hook scheduler (spec §4.E). Grounded on `libcontainer::hooks::run_hooks`,
//! generalized into one callable per OCI phase instead of a single combined
//! "run everything now" entry point, since the orchestrator (§4.H) interleaves
//! phases with sync-channel round trips.

use std::process::{Command, Stdio};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use oci_spec::runtime::Hook;
use tracing::debug;

use crate::error::{Error, Result};

/// Runs every hook in `hooks` strictly sequentially, in order. `state_json`
/// is written to each hook's stdin, matching the OCI hook contract.
pub fn run_phase(phase: &str, hooks: &[Hook], state_json: &str) -> Result<()> {
    for hook in hooks {
        debug!(phase, path = %hook.path().display(), "running hook");
        run_one(hook, state_json)?;
    }
    Ok(())
}

fn run_one(hook: &Hook, state_json: &str) -> Result<()> {
    let args = hook.args().clone().unwrap_or_else(|| vec![hook.path().display().to_string()]);
    let envs = hook.env().clone().unwrap_or_default();

    let mut command = Command::new(hook.path());
    command.args(args.into_iter().skip(1));
    command.env_clear();
    for kv in &envs {
        if let Some((k, v)) = kv.split_once('=') {
            command.env(k, v);
        }
    }
    command.stdin(Stdio::piped());
    command.stdout(Stdio::null());
    command.stderr(Stdio::inherit());

    let mut child = command.spawn().map_err(|e| Error::hook(format!("spawn {:?}: {e}", hook.path())))?;
    {
        use std::io::Write;
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(state_json.as_bytes());
        }
    }

    let pid = Pid::from_raw(child.id() as i32);
    let timeout = hook.timeout().map(|secs| Duration::from_secs(secs as u64));

    let status = match timeout {
        None => child.wait().map_err(|e| Error::hook(e.to_string()))?,
        Some(limit) => wait_with_timeout(pid, limit)?,
    };

    if !status.success() {
        return Err(Error::hook(format!(
            "{:?} exited with {status}",
            hook.path()
        )));
    }
    Ok(())
}

fn wait_with_timeout(pid: Pid, limit: Duration) -> Result<std::process::ExitStatus> {
    let (tx, rx) = bounded(1);
    // std::process::Child::wait borrows the child, so the waiter thread needs
    // raw waitpid on the pid instead of sharing the Child handle.
    let waiter = std::thread::spawn(move || {
        let result = waitpid(pid, None);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(limit) {
        Ok(Ok(WaitStatus::Exited(_, code))) => {
            let _ = waiter.join();
            Ok(exit_status_from_code(code))
        }
        Ok(Ok(WaitStatus::Signaled(_, sig, _))) => {
            let _ = waiter.join();
            Ok(exit_status_from_code(128 + sig as i32))
        }
        Ok(Ok(_)) => {
            let _ = waiter.join();
            Ok(exit_status_from_code(1))
        }
        Ok(Err(e)) => Err(Error::hook(e.to_string())),
        Err(RecvTimeoutError::Timeout) => {
            let _ = kill(pid, Signal::SIGKILL);
            let _ = waiter.join();
            Err(Error::hook("hook timed out"))
        }
        Err(RecvTimeoutError::Disconnected) => Err(Error::hook("hook waiter thread died")),
    }
}

fn exit_status_from_code(code: i32) -> std::process::ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    std::process::ExitStatus::from_raw(code << 8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_spec::runtime::HookBuilder;

    fn hook(args: &[&str]) -> Hook {
        HookBuilder::default()
            .path("/bin/sh")
            .args(args.iter().map(|s| s.to_string()).collect::<Vec<_>>())
            .build()
            .unwrap()
    }

    #[test]
    fn successful_hook_runs_to_completion() {
        let h = hook(&["sh", "-c", "exit 0"]);
        run_phase("prestart", &[h], "{}").unwrap();
    }

    #[test]
    fn nonzero_exit_is_a_hook_error() {
        let h = hook(&["sh", "-c", "exit 17"]);
        let err = run_phase("prestart", &[h], "{}").unwrap_err();
        assert_eq!(err.kind(), box_core::ErrorKind::Hook);
    }

    #[test]
    fn hook_receives_state_on_stdin() {
        let h = HookBuilder::default()
            .path("/bin/sh")
            .args(vec!["sh".to_string(), "-c".to_string(), "grep -q hello".to_string()])
            .build()
            .unwrap();
        run_phase("prestart", &[h], "hello world").unwrap();
    }

    #[test]
    fn timeout_kills_a_hung_hook() {
        let mut h = hook(&["sh", "-c", "sleep 30"]);
        h.set_timeout(Some(1));
        let err = run_phase("poststart", &[h], "{}").unwrap_err();
        assert_eq!(err.kind(), box_core::ErrorKind::Hook);
    }
}
