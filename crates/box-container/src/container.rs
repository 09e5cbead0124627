//! Orchestrator (spec §4.H). Composes components A-G into the `run` and
//! `exec` flows and owns the `Creating -> Created -> Running -> Stopped`
//! state machine. Grounded on `libcontainer::container::{builder,
//! builder_impl,container}` for the run-flow shape and `libcontainer::
//! container::{init_builder,tenant_builder}` for the exec-flow shape.

use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use box_core::sync::SyncSocket;
use nix::unistd::Pid;
use tracing::{info, instrument};

use crate::cgroup::CgroupOps;
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::namespaces::NamespacePlan;
use crate::process::{child, clone, parent};
use crate::status::{RuntimeStatus, StatusDirectory, StatusRecord};
use crate::tty;

pub struct Orchestrator {
    id: String,
    bundle: PathBuf,
    config: Option<RuntimeConfig>,
    status_dir: StatusDirectory,
}

impl Orchestrator {
    pub fn new(id: &str, bundle: &Path, config: RuntimeConfig, status_dir: StatusDirectory) -> Result<Self> {
        if status_dir.exists(id) {
            return Err(Error::state(format!("container {id:?} already exists")));
        }
        Ok(Orchestrator { id: id.to_string(), bundle: bundle.to_path_buf(), config: Some(config), status_dir })
    }

    /// An orchestrator handle for `exec`/`kill`/`list` against an
    /// already-running container, which need only the status directory —
    /// unlike `run`, they never re-derive a `RuntimeConfig` from a bundle.
    pub fn for_existing(id: &str, status_dir: StatusDirectory) -> Self {
        Orchestrator { id: id.to_string(), bundle: PathBuf::new(), config: None, status_dir }
    }

    #[instrument(skip(self, cgroup), fields(id = %self.id))]
    pub fn run(&self, cgroup: &dyn CgroupOps) -> Result<i32> {
        let config = self.config.as_ref().ok_or_else(|| Error::state("run requires a RuntimeConfig"))?;
        let mut record = StatusRecord::new(&self.id, &self.bundle, config.annotations.clone(), &config.oci_version);
        self.status_dir.save(&record)?;
        info!("container entering Creating");

        let plan = NamespacePlan::build(&config.namespaces)?;
        cgroup.precreate(config)?;

        let (mut parent_sync, mut child_sync) = SyncSocket::pair()?;

        let pty = if config.process.terminal {
            Some(tty::allocate()?)
        } else {
            None
        };
        let slave_raw = pty.as_ref().map(|p| tty::as_raw(&p.slave));

        let config = config.clone();
        let namespace_plan_for_child = NamespacePlan::build(&config.namespaces)?;
        let child_pid = clone::clone_into_namespaces(plan.clone_flags, move || {
            match child::run(&config, &mut child_sync, &namespace_plan_for_child) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("Error: {e}");
                    1
                }
            }
        })?;

        record.pid = child_pid.as_raw();
        record.status = RuntimeStatus::Created;
        self.status_dir.save(&record)?;
        info!(pid = child_pid.as_raw(), "container entering Created");
        cgroup.create(child_pid, &config)?;

        let pty_fds = pty.as_ref().map(|p| {
            (std::io::stdin().as_raw_fd(), std::io::stdout().as_raw_fd(), tty::as_raw(&p.master))
        });

        let outcome = match parent::drive(&config, child_pid, parent_sync, slave_raw, pty_fds, &self.status_dir, &mut record) {
            Ok(outcome) => outcome,
            Err(e) => {
                record.status = RuntimeStatus::Stopped;
                self.status_dir.save(&record)?;
                self.status_dir.remove(&self.id)?;
                return Err(e);
            }
        };

        record.status = RuntimeStatus::Stopped;
        self.status_dir.save(&record)?;
        info!(exit_code = outcome.exit_code, "container entering Stopped");
        cgroup.destroy()?;
        self.status_dir.remove(&self.id)?;

        Ok(outcome.exit_code)
    }

    /// Exec flow (spec §4.H): locate the target pid, join its mount/pid/user
    /// namespaces, set cwd, exec the requested command. `exec` into an
    /// already-`Stopped` container is a `State` error (Open Question
    /// decision 3), not a spawn into the defunct namespace. `user` is the
    /// lenient `UID[:GID]` override from `-u/--user` (spec §6); a bare uid
    /// leaves the group untouched rather than defaulting it to root, per
    /// `original_source`'s `command/options.cpp`.
    pub fn exec(&self, args: &[String], cwd: Option<&Path>, user: Option<(u32, Option<u32>)>) -> Result<i32> {
        let record = self.status_dir.load(&self.id)?;
        if !record.is_alive() {
            return Err(Error::state(format!("container {:?} is not running", self.id)));
        }

        let target = Pid::from_raw(record.pid);
        let joins = [
            crate::config::NamespaceKind::Mount,
            crate::config::NamespaceKind::Pid,
            crate::config::NamespaceKind::User,
        ]
        .into_iter()
        .map(|kind| crate::config::NamespaceEntry { kind, join_path: Some(crate::namespaces::proc_ns_path(target, kind)) })
        .collect::<Vec<_>>();
        let plan = NamespacePlan::build(&joins)?;
        plan.setns_all()?;

        if let Some(dir) = cwd {
            nix::unistd::chdir(dir)?;
        }

        if let Some((uid, gid)) = user {
            if let Some(gid) = gid {
                nix::unistd::setgid(nix::unistd::Gid::from_raw(gid))?;
            }
            nix::unistd::setuid(nix::unistd::Uid::from_raw(uid))?;
        }

        exec_command(args)
    }

    pub fn kill(&self, signal: nix::sys::signal::Signal) -> Result<()> {
        let record = self.status_dir.load(&self.id)?;
        if !record.is_alive() {
            return Err(Error::state(format!("container {:?} is not running", self.id)));
        }
        nix::sys::signal::kill(Pid::from_raw(record.pid), signal)?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<StatusRecord>> {
        self.status_dir.list()
    }
}

fn exec_command(args: &[String]) -> Result<i32> {
    use std::ffi::CString;
    if args.is_empty() {
        return Err(Error::config("exec requires a command"));
    }
    let path = CString::new(args[0].as_bytes()).map_err(|_| Error::config("nul byte in argv[0]"))?;
    let argv: Vec<CString> = args.iter().map(|a| CString::new(a.as_bytes()).unwrap()).collect();
    let env: Vec<CString> = std::env::vars()
        .map(|(k, v)| CString::new(format!("{k}={v}")).unwrap())
        .collect();
    nix::unistd::execvpe(&path, &argv, &env)?;
    unreachable!("execvpe only returns on error");
}
