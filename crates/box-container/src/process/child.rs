//! Container-side init sequence (spec §4.H "Run flow (child perspective)").
//! Grounded on `libcontainer::process::container_init_process::container_init_process`.

use std::ffi::CString;
use std::os::fd::RawFd;

use box_core::sync::{SyncMessage, SyncSocket};
use nix::unistd::{self, Gid, Uid};

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::namespaces::NamespacePlan;
use crate::{capabilities, hooks, pivot, rootfs};

/// Closes every inherited descriptor except stdin/stdout/stderr and the
/// sync socket (spec §4.H child step 1). Anything the container process
/// needs past this point — in particular a PTY slave — must arrive over
/// the surviving sync socket instead of riding along from before the clone.
fn close_inherited_fds(keep: &[RawFd]) -> Result<()> {
    let entries = std::fs::read_dir("/proc/self/fd")?;
    for entry in entries {
        let entry = entry?;
        let Ok(fd) = entry.file_name().to_string_lossy().parse::<RawFd>() else { continue };
        if fd <= 2 || keep.contains(&fd) {
            continue;
        }
        let _ = nix::unistd::close(fd);
    }
    Ok(())
}

/// Runs entirely inside the cloned child. Returns only on failure (the
/// success path ends in `execvpe`, which never returns).
pub fn run(config: &RuntimeConfig, sync: &mut SyncSocket, namespace_plan: &NamespacePlan) -> Result<()> {
    wait_for_trace_me_if_requested()?;

    // Guarantees orphan cleanup if the parent dies before the child reaches
    // its own exit path (spec §5 "Pdeath safety").
    prctl::set_death_signal(nix::sys::signal::Signal::SIGKILL as i32)
        .map_err(|e| Error::config(format!("PR_SET_PDEATHSIG failed with errno {e}")))?;

    namespace_plan.setns_all()?;

    // Step 1: close everything except stdio and the sync socket.
    close_inherited_fds(&[sync.as_raw()])?;

    // Step 2: begin the sync handshake.
    sync.send(SyncMessage::RequestConfigureNamespace)?;
    let slave_pty = if config.process.terminal {
        let [fd] = sync.expect_with_fds::<1>(SyncMessage::NamespaceConfigured)?;
        Some(fd)
    } else {
        sync.expect(SyncMessage::NamespaceConfigured)?;
        None
    };

    if let Some(slave) = slave_pty {
        pivot::attach_controlling_terminal(slave)?;
    }

    // Step 3: mounts.
    let rootfs_path = config.root.path.clone();
    let rootfs_fd = box_core::fd::open(
        &rootfs_path,
        nix::fcntl::OFlag::O_DIRECTORY | nix::fcntl::OFlag::O_RDONLY,
        nix::sys::stat::Mode::empty(),
    )?;
    rootfs::prepare_rootfs(&rootfs_fd, config)?;

    // Step 4.
    let has_early_hooks = !config.hooks.prestart.is_empty() || !config.hooks.create_runtime.is_empty();
    if has_early_hooks {
        sync.send(SyncMessage::RequestCreateRuntimeHooks)?;
        sync.expect(SyncMessage::CreateRuntimeHooksExecuted)?;
    }

    // Step 5.
    let state_json = state_json(config);
    hooks::run_phase("createContainer", &config.hooks.create_container, &state_json)?;
    sync.send(SyncMessage::CreateContainerHooksExecuted)?;

    // Step 6.
    pivot::pivot(&rootfs_path, config.rootfs_propagation)?;

    // Step 7.
    hooks::run_phase("startContainer", &config.hooks.start_container, &state_json)?;
    sync.send(SyncMessage::StartContainerHooksExecuted)?;

    // Step 8.
    unistd::chdir(&config.process.cwd)?;
    drop_privileges(config)?;
    exec_process(config)
}

extern "C" fn ignore_signal(_: i32) {}

/// Debugging hook (spec §6 env vars): when
/// `LINYAPS_BOX_CONTAINER_PROCESS_TRACE_ME` is set, the freshly cloned child
/// blocks on `SIGUSR1` before doing anything else, giving a debugger time to
/// attach (e.g. `strace -p`/`gdb`) before namespace setup begins.
fn wait_for_trace_me_if_requested() -> Result<()> {
    if std::env::var_os("LINYAPS_BOX_CONTAINER_PROCESS_TRACE_ME").is_none() {
        return Ok(());
    }
    use nix::sys::signal::{self, SigHandler, Signal};
    // SAFETY: the handler only returns; it does no work unsafe to run from a
    // signal context.
    unsafe { signal::signal(Signal::SIGUSR1, SigHandler::Handler(ignore_signal))? };
    unistd::pause();
    unsafe { signal::signal(Signal::SIGUSR1, SigHandler::SigDfl)? };
    Ok(())
}

fn state_json(config: &RuntimeConfig) -> String {
    // The OCI hook contract only requires a JSON document on stdin; the
    // fields a hook might read (pid, bundle) are not yet meaningful before
    // exec, so only what is already known is included.
    serde_json::json!({
        "ociVersion": config.oci_version,
        "annotations": config.annotations,
    })
    .to_string()
}

fn drop_privileges(config: &RuntimeConfig) -> Result<()> {
    if !config.process.additional_gids.is_empty() {
        let gids: Vec<Gid> = config.process.additional_gids.iter().map(|g| Gid::from_raw(*g)).collect();
        unistd::setgroups(&gids)?;
    } else {
        unistd::setgroups(&[])?;
    }
    unistd::setgid(Gid::from_raw(config.process.gid))?;
    unistd::setuid(Uid::from_raw(config.process.uid))?;

    if let Some(caps) = &config.process.capabilities {
        capabilities::apply(caps)?;
    }
    if config.process.no_new_privileges {
        prctl::set_no_new_privileges(true).map_err(|e| Error::config(format!("PR_SET_NO_NEW_PRIVS: {e}")))?;
    }
    Ok(())
}

fn exec_process(config: &RuntimeConfig) -> Result<()> {
    let args = &config.process.args;
    if args.is_empty() {
        return Err(Error::config("process.args is empty"));
    }
    let path = CString::new(args[0].as_bytes()).map_err(|_| Error::config("nul byte in argv[0]"))?;
    let argv: Vec<CString> = args.iter().map(|a| CString::new(a.as_bytes()).unwrap()).collect();
    let envp: Vec<CString> = config
        .process
        .env
        .iter()
        .map(|e| CString::new(e.as_bytes()).unwrap())
        .collect();

    unistd::execvpe(&path, &argv, &envp)?;
    unreachable!("execvpe only returns on error, which is mapped by `?` above");
}
