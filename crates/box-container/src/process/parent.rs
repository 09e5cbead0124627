//! Runtime-side (parent) run flow (spec §4.H "Run flow (parent
//! perspective)"). Grounded on `libcontainer::container::builder_impl::
//! ContainerBuilderImpl::create`, generalized to the explicit 2-process
//! sync-message schedule this spec mandates.

use std::os::fd::RawFd;

use box_core::sync::{SyncMessage, SyncSocket};
use nix::unistd::Pid;
use tracing::info;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::status::{RuntimeStatus, StatusDirectory, StatusRecord};
use crate::supervisor::Supervisor;
use crate::{hooks, rootless};

pub struct RunOutcome {
    pub exit_code: i32,
}

/// Drives steps 4-10 of spec §4.H's parent-side run flow. Steps 1-3
/// (status-record construction, socket-pair creation, clone) happen in the
/// caller (`Orchestrator::run`), since they also decide the `Created`
/// status-directory transition the orchestrator owns.
pub fn drive(
    config: &RuntimeConfig,
    child_pid: Pid,
    mut sync: SyncSocket,
    slave_pty: Option<RawFd>,
    pty: Option<(RawFd, RawFd, RawFd)>,
    status_dir: &StatusDirectory,
    record: &mut StatusRecord,
) -> Result<RunOutcome> {
    sync.expect(SyncMessage::RequestConfigureNamespace)?;
    rootless::install_id_maps(child_pid, &config.uid_mappings, &config.gid_mappings)?;
    // The child closed every fd it inherited from before the clone (spec
    // §4.H child step 1), so the PTY slave has to be handed over fresh
    // here, riding the reply that unblocks it past that close.
    match slave_pty {
        Some(fd) => sync.send_fds(SyncMessage::NamespaceConfigured, &[fd])?,
        None => sync.send(SyncMessage::NamespaceConfigured)?,
    }
    info!(pid = child_pid.as_raw(), "namespaces configured");

    hooks::run_phase("prestart", &config.hooks.prestart, "{}")?;

    let has_early_hooks =
        !config.hooks.prestart.is_empty() || !config.hooks.create_runtime.is_empty();
    if has_early_hooks {
        sync.expect(SyncMessage::RequestCreateRuntimeHooks)?;
        hooks::run_phase("createRuntime", &config.hooks.create_runtime, "{}")?;
        sync.send(SyncMessage::CreateRuntimeHooksExecuted)?;
    }

    // The child always runs the createContainer/startContainer phases (each
    // possibly with an empty hook list) and always acks them, regardless of
    // whether this particular config has hooks in either phase — unlike the
    // `RequestCreateRuntimeHooks` round trip above, these two checkpoints are
    // not conditional on hook presence, so both sides read/write them
    // unconditionally.
    sync.expect(SyncMessage::CreateContainerHooksExecuted)?;
    sync.expect(SyncMessage::StartContainerHooksExecuted)?;

    // Transition to Running is implicit on receipt of this message (spec
    // §4.H), before the container's own command has necessarily execed.
    record.status = RuntimeStatus::Running;
    status_dir.save(record)?;
    info!(pid = child_pid.as_raw(), "container entering Running");

    sync.wait_close()?;
    info!(pid = child_pid.as_raw(), "container exec'd");

    hooks::run_phase("poststart", &config.hooks.poststart, "{}")?;

    let supervisor = Supervisor::new(child_pid, pty)?;
    let outcome = supervisor.run()?;

    if let Err(e) = hooks::run_phase("poststop", &config.hooks.poststop, "{}") {
        tracing::warn!(%e, "poststop hook failed; not fatal");
    }

    Ok(RunOutcome { exit_code: outcome.0 })
}

/// Errors in the parent during setup abort the orchestration and close the
/// sync socket, which the child observes as an early close and fails on
/// (spec §4.H "Failure in any child-side step...").
pub fn abort(sync: SyncSocket, reason: &str) -> Error {
    sync.close();
    Error::state(format!("parent aborted container setup: {reason}"))
}
