//! Mount engine entry point (spec §4.C). Grounded on
//! `libcontainer::rootfs::RootFS::prepare_rootfs`: open the rootfs directory,
//! run every configured mount, then the OCI default filesystems/devices,
//! then flush deferred remounts, then apply masked/readonly paths.

pub mod device;
pub mod mount;

use std::os::fd::RawFd;
use std::path::Path;

use nix::fcntl::OFlag;
use nix::mount::MsFlags;
use nix::sys::stat::Mode;

use box_core::fd::{self, Fd};

use crate::config::RuntimeConfig;
use crate::error::Result;

/// Materializes `config.mounts`, the OCI default filesystems/devices, and
/// the masked/readonly path overlays under `rootfs_fd`. Must run inside the
/// container's own mount namespace, after that namespace is configured.
pub fn prepare_rootfs(rootfs_fd: &Fd, config: &RuntimeConfig) -> Result<()> {
    let root_raw = rootfs_fd.as_raw();

    let mut deferred = Vec::new();
    for entry in &config.mounts {
        mount::setup_mount(root_raw, entry, &mut deferred)?;
    }

    mount::mount_defaults(root_raw)?;
    create_dev_directory_if_absent(root_raw)?;
    device::create_default_devices(dev_dir_fd(root_raw)?.as_raw())?;

    mount::apply_deferred_remounts(deferred)?;

    apply_masked_paths(root_raw, &config.masked_paths)?;
    apply_readonly_paths(root_raw, &config.readonly_paths)?;
    Ok(())
}

fn create_dev_directory_if_absent(root_fd: RawFd) -> Result<()> {
    fd::mkdir(root_fd, Path::new("dev"), Mode::from_bits_truncate(0o755))?;
    Ok(())
}

fn dev_dir_fd(root_fd: RawFd) -> Result<Fd> {
    Ok(fd::open_at(
        root_fd,
        Path::new("dev"),
        OFlag::O_DIRECTORY | OFlag::O_PATH,
        Mode::empty(),
    )?)
}

/// Masked paths are bind-mounted over with `/dev/null` (files) or an empty
/// tmpfs (directories), hiding host information the container should not see
/// (e.g. `/proc/kcore`).
fn apply_masked_paths(root_fd: RawFd, paths: &[std::path::PathBuf]) -> Result<()> {
    for path in paths {
        let st = match fd::fstatat(root_fd, path, nix::fcntl::AtFlags::empty()) {
            Ok(st) => st,
            Err(_) => continue, // nothing to mask if the path does not exist
        };
        let dest = fd::open_at(root_fd, path, OFlag::O_PATH, Mode::empty())?;
        let proc_path = dest.proc_path();
        let is_dir = fd::is_dir(nix::sys::stat::SFlag::from_bits_truncate(st.st_mode));
        let source = if is_dir { None } else { Some(Path::new("/dev/null")) };
        let fstype = is_dir.then_some("tmpfs");
        let flags = if is_dir { MsFlags::MS_RDONLY } else { MsFlags::MS_BIND };
        nix::mount::mount(source, &proc_path, fstype, flags, None::<&str>)?;
    }
    Ok(())
}

/// Readonly paths get a bind-mount-to-self followed by a read-only remount.
fn apply_readonly_paths(root_fd: RawFd, paths: &[std::path::PathBuf]) -> Result<()> {
    for path in paths {
        if fd::fstatat(root_fd, path, nix::fcntl::AtFlags::empty()).is_err() {
            continue;
        }
        let dest = fd::open_at(root_fd, path, OFlag::O_PATH, Mode::empty())?;
        let proc_path = dest.proc_path();
        nix::mount::mount(
            Some(&proc_path),
            &proc_path,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None::<&str>,
        )?;
        nix::mount::mount(
            None::<&str>,
            &proc_path,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_REC,
            None::<&str>,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::OFlag as OF;
    use nix::sys::stat::Mode as M;
    use serial_test::serial;
    use std::os::unix::fs::symlink;

    #[test]
    #[serial]
    fn bind_mount_destination_cannot_escape_symlink() {
        let tmp = tempfile::tempdir().unwrap();
        let rootfs = tmp.path().join("rootfs");
        std::fs::create_dir_all(rootfs.join("etc")).unwrap();
        // /etc/passwd -> / : an attacker-controlled symlink escape attempt
        symlink("/", rootfs.join("etc/passwd")).unwrap();

        let root_fd = fd::open(&rootfs, OF::O_DIRECTORY | OF::O_RDONLY, M::empty()).unwrap();
        let source = tmp.path().join("source-file");
        std::fs::write(&source, b"hi").unwrap();

        let entry = crate::config::MountEntry {
            source: Some(source.clone()),
            destination: Some(Path::new("/etc/passwd").to_path_buf()),
            typ: None,
            flags: MsFlags::MS_BIND,
            propagation: Default::default(),
            extension: Default::default(),
            data: String::new(),
        };
        let mut deferred = Vec::new();
        // Destination creation runs through box_core::fd's confined
        // resolver and needs no privilege; only the final mount(2) call
        // (which this unprivileged test expects to fail) needs CAP_SYS_ADMIN.
        let result = mount::setup_mount(root_fd.as_raw(), &entry, &mut deferred);
        assert!(result.is_err(), "unprivileged bind mount must fail, not silently succeed");
        // the real host file must be untouched: the resolver never escaped
        // `rootfs` to follow the `/etc/passwd -> /` symlink onto it.
        assert_ne!(std::fs::read_to_string("/etc/passwd").unwrap_or_default(), "hi");
    }
}
