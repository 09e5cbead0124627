//! End-to-end scenarios S1-S6 (spec §8 "testable properties"). These need a
//! user-namespace-capable kernel and are not run by a hermetic `cargo test`;
//! grounded on `libcontainer`'s own split between fast unit tests and its
//! `crates/libcontainer/tests/` directory for kernel-dependent ones.

use std::path::PathBuf;

use anyhow::{Context, Result};
use box_container::cgroup::{self, CgroupManagerKind};
use box_container::config::RuntimeConfig;
use box_container::status::{RuntimeStatus, StatusDirectory};
use box_container::Orchestrator;
use oci_spec::runtime::{
    HookBuilder, HooksBuilder, LinuxBuilder, LinuxIdMappingBuilder, LinuxNamespaceBuilder,
    LinuxNamespaceType, MountBuilder, ProcessBuilder, RootBuilder, Spec, SpecBuilder, UserBuilder,
};
use tempfile::TempDir;

/// Builds a bundle whose rootfs is the live host `/`: `pivot::pivot` binds
/// the rootfs path onto itself before pivoting, so it never needs to be a
/// pre-existing mountpoint, and reusing the host tree gives every scenario
/// real binaries (`/bin/true`, `/bin/echo`, ...) without assembling one.
fn bundle(args: &[&str], terminal: bool) -> Result<TempDir> {
    let bundle = tempfile::tempdir()?;
    let uid = nix::unistd::geteuid().as_raw();
    let gid = nix::unistd::getegid().as_raw();

    let namespaces = vec![
        LinuxNamespaceBuilder::default().typ(LinuxNamespaceType::User).build()?,
        LinuxNamespaceBuilder::default().typ(LinuxNamespaceType::Mount).build()?,
        LinuxNamespaceBuilder::default().typ(LinuxNamespaceType::Pid).build()?,
    ];
    let linux = LinuxBuilder::default()
        .namespaces(namespaces)
        .uid_mappings(vec![LinuxIdMappingBuilder::default()
            .host_id(uid)
            .container_id(0u32)
            .size(1u32)
            .build()?])
        .gid_mappings(vec![LinuxIdMappingBuilder::default()
            .host_id(gid)
            .container_id(0u32)
            .size(1u32)
            .build()?])
        .build()?;

    let spec = SpecBuilder::default()
        .process(
            ProcessBuilder::default()
                .args(args.iter().map(|a| a.to_string()).collect::<Vec<_>>())
                .cwd("/")
                .env(vec!["PATH=/usr/bin:/bin".to_string()])
                .terminal(terminal)
                .user(UserBuilder::default().uid(0u32).gid(0u32).build()?)
                .build()?,
        )
        .root(RootBuilder::default().path("/").readonly(false).build()?)
        .linux(linux)
        .build()?;

    spec.save(bundle.path().join("config.json"))?;
    Ok(bundle)
}

fn run(bundle: &TempDir, status_root: &std::path::Path, id: &str) -> Result<i32> {
    let spec = Spec::load(bundle.path().join("config.json"))?;
    let config = RuntimeConfig::from_spec(&spec, bundle.path())?;
    let status_dir = StatusDirectory::open(status_root)?;
    let orchestrator = Orchestrator::new(id, bundle.path(), config, status_dir)?;
    let cgroup = cgroup::resolve(CgroupManagerKind::Disabled)?;
    Ok(orchestrator.run(cgroup.as_ref())?)
}

/// S1 — rootless `true`: exit 0, no status file left behind afterward.
#[test]
#[ignore = "needs a user-namespace-capable kernel"]
fn s1_rootless_true_exits_cleanly() -> Result<()> {
    let bundle = bundle(&["/bin/true"], false)?;
    let status_root = tempfile::tempdir()?;
    let exit_code = run(&bundle, status_root.path(), "s1")?;
    assert_eq!(exit_code, 0);

    let status_dir = StatusDirectory::open(status_root.path())?;
    assert!(status_dir.load("s1").is_err(), "status record should be removed on Stopped");
    Ok(())
}

/// S2 — stdout capture: exactly `hello\n`, exit 0. Capturing the
/// supervisor's forwarded stdout is out of this test's reach without
/// wiring a pipe in place of the real terminal/stdio fds; this scenario
/// documents the expectation that `run` observes so a future harness with
/// pipe capture can assert on it directly.
#[test]
#[ignore = "needs a user-namespace-capable kernel"]
fn s2_stdout_capture_exits_cleanly() -> Result<()> {
    let bundle = bundle(&["/bin/echo", "hello"], false)?;
    let status_root = tempfile::tempdir()?;
    let exit_code = run(&bundle, status_root.path(), "s2")?;
    assert_eq!(exit_code, 0);
    Ok(())
}

/// S3 — bind-mount read-only: `touch` under a ro bind mount fails with
/// `EROFS`, reading through it still works.
#[test]
#[ignore = "needs a user-namespace-capable kernel"]
fn s3_readonly_bind_mount_rejects_writes() -> Result<()> {
    let bundle = bundle(&["/bin/sh", "-c", "touch /usr/__linyaps_box_test && exit 1 || test -f /usr/bin/true"], false)?;

    let mut spec = Spec::load(bundle.path().join("config.json"))?;
    spec.set_mounts(Some(vec![MountBuilder::default()
        .destination(PathBuf::from("/usr"))
        .typ("bind")
        .source(PathBuf::from("/usr"))
        .options(vec!["bind".to_string(), "ro".to_string()])
        .build()?]));
    spec.save(bundle.path().join("config.json"))?;

    let status_root = tempfile::tempdir()?;
    let exit_code = run(&bundle, status_root.path(), "s3")?;
    assert_eq!(exit_code, 0);
    Ok(())
}

/// S4 — a prestart hook runs before the container's own command.
#[test]
#[ignore = "needs a user-namespace-capable kernel"]
fn s4_prestart_hook_runs_before_container_command() -> Result<()> {
    let bundle = bundle(&["/bin/true"], false)?;

    let mut spec = Spec::load(bundle.path().join("config.json"))?;
    spec.set_hooks(Some(
        HooksBuilder::default()
            .prestart(vec![HookBuilder::default().path("/bin/sh").args(vec!["sh".to_string(), "-c".to_string(), "exit 0".to_string()]).build()?])
            .build()?,
    ));
    spec.save(bundle.path().join("config.json"))?;

    let status_root = tempfile::tempdir()?;
    let exit_code = run(&bundle, status_root.path(), "s4")?;
    assert_eq!(exit_code, 0);
    Ok(())
}

/// S5 — a terminal container forwards `SIGTERM` as `128 + 15`. `SIGWINCH`
/// resize propagation is exercised at the unit level in
/// `supervisor::forwarder` rather than end-to-end here, since asserting on
/// `ioctl(TIOCGWINSZ)` inside the container needs a second process attached
/// to its PTY slave.
#[test]
#[ignore = "needs a user-namespace-capable kernel"]
fn s5_sigterm_reports_128_plus_signal() -> Result<()> {
    let bundle = bundle(&["/bin/cat"], true)?;
    let status_root = tempfile::tempdir()?;
    let id = "s5".to_string();
    let status_root_path = status_root.path().to_path_buf();

    let handle = std::thread::spawn(move || run(&bundle, &status_root_path, &id));

    std::thread::sleep(std::time::Duration::from_millis(200));
    let status_dir = StatusDirectory::open(status_root.path())?;
    let record = status_dir.load("s5").context("container should have a status record")?;
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(record.pid), nix::sys::signal::Signal::SIGTERM)?;

    let exit_code = handle.join().unwrap()?;
    assert_eq!(exit_code, 128 + 15);
    Ok(())
}

/// S6 — `list` shows the running container, `kill` stops it, `list`
/// afterward is empty.
#[test]
#[ignore = "needs a user-namespace-capable kernel"]
fn s6_list_and_kill() -> Result<()> {
    let bundle = bundle(&["/bin/sleep", "10"], false)?;
    let status_root = tempfile::tempdir()?;
    let id = "s6".to_string();
    let status_root_path = status_root.path().to_path_buf();

    let handle = std::thread::spawn(move || run(&bundle, &status_root_path, &id));
    std::thread::sleep(std::time::Duration::from_millis(200));

    let status_dir = StatusDirectory::open(status_root.path())?;
    let lister = Orchestrator::for_existing("", StatusDirectory::open(status_root.path())?);
    let records = lister.list()?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RuntimeStatus::Running);
    let pid = records[0].pid;

    let killer = Orchestrator::for_existing("s6", status_dir);
    killer.kill(nix::sys::signal::Signal::SIGKILL)?;

    let exit_code = handle.join().unwrap()?;
    assert_eq!(exit_code, 128 + 9);
    assert!(nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err());

    let lister = Orchestrator::for_existing("", StatusDirectory::open(status_root.path())?);
    assert!(lister.list()?.is_empty());
    Ok(())
}
