//! Pivot-root & stdio wiring (spec §4.F). Grounded on
//! `libcontainer::syscall::linux::LinuxSyscall::pivot_rootfs` for the
//! self-pivot trick and `libcontainer::tty` for the PTY handshake.

use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use nix::fcntl::OFlag;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::stat::Mode;
use nix::unistd::{chdir, fchdir, pivot_root};

use box_core::fd;

use crate::config::RootfsPropagation;
use crate::error::Result;

fn propagation_flag(propagation: RootfsPropagation) -> MsFlags {
    match propagation {
        RootfsPropagation::Shared => MsFlags::MS_SHARED,
        RootfsPropagation::Slave => MsFlags::MS_SLAVE,
        RootfsPropagation::Private => MsFlags::MS_PRIVATE,
        RootfsPropagation::Unbindable => MsFlags::MS_UNBINDABLE,
    }
}

/// Runs the seven-step pivot sequence described in spec §4.F. `rootfs` is
/// the bundle-relative rootfs path, already resolved to an absolute path by
/// the caller (`RuntimeConfig::root.path`). `propagation` is the OCI spec's
/// `linux.rootfsPropagation`, applied to the rootfs's own mount point once
/// it is bound onto itself (step 3), separately from the host-wide `MS_REC
/// | MS_PRIVATE` isolation in step 1.
pub fn pivot(rootfs: &Path, propagation: RootfsPropagation) -> Result<()> {
    // 1. mount-event isolation: detach from the host's propagation tree
    // before any of our own mounts can leak out.
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )?;

    // 2. confined resolver open of the rootfs itself.
    let parent = fd::open(
        rootfs.parent().unwrap_or(Path::new("/")),
        OFlag::O_DIRECTORY | OFlag::O_PATH,
        Mode::empty(),
    )?;
    let name = rootfs.file_name().map(Path::new).unwrap_or(Path::new("."));
    let rootfs_fd = fd::open_at(parent.as_raw(), name, OFlag::O_DIRECTORY | OFlag::O_RDONLY, Mode::empty())?;

    // 3. bind rootfs onto itself: a prerequisite for pivot_root, which
    // requires both paths to be mount points.
    let proc_path = rootfs_fd.proc_path();
    mount(Some(&proc_path), &proc_path, None::<&str>, MsFlags::MS_BIND | MsFlags::MS_REC, None::<&str>)?;

    // 3.5. apply the configured rootfs propagation to the now-bound rootfs
    // mount point.
    mount(None::<&str>, &proc_path, None::<&str>, MsFlags::MS_REC | propagation_flag(propagation), None::<&str>)?;

    // 4. fchdir into it.
    fchdir(rootfs_fd.as_raw())?;

    // 5. the self-pivot trick: both new_root and put_old are "."
    pivot_root(".", ".")?;

    // 6. detach every stacked old-root mount.
    loop {
        match umount2(".", MntFlags::MNT_DETACH) {
            Ok(()) => continue,
            Err(nix::Error::EINVAL) => break,
            Err(e) => return Err(e.into()),
        }
    }

    // 7. land at the new root.
    chdir("/")?;
    // rootfs_fd must outlive step 6: umount2(".") resolves relative to the
    // process cwd/fd table, not to this descriptor directly, but holding it
    // open until here keeps the intent next to the code it protects.
    drop(rootfs_fd);
    Ok(())
}

/// Duplicates `slave_fd` onto stdin/stdout/stderr and makes it the
/// controlling terminal, matching the second half of spec §4.F's terminal
/// branch.
pub fn attach_controlling_terminal(slave_fd: RawFd) -> Result<()> {
    use nix::unistd::dup2;
    dup2(slave_fd, 0)?;
    dup2(slave_fd, 1)?;
    dup2(slave_fd, 2)?;
    if slave_fd > 2 {
        nix::unistd::close(slave_fd)?;
    }
    unsafe {
        if libc::ioctl(0, libc::TIOCSCTTY as _, 0) != 0 {
            return Err(nix::Error::last().into());
        }
    }
    Ok(())
}
