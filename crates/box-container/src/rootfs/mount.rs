//! The per-entry mount algorithm and OCI default filesystems (spec §4.C).
//! Grounded on `libcontainer::rootfs::{rootfs,mount}::Mount::setup_mount`.

use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use nix::mount::MsFlags;
use nix::sys::stat::{Mode, SFlag};
use nix::sys::statfs::{FsType, PROC_SUPER_MAGIC, SYSFS_MAGIC, TMPFS_MAGIC};
use tracing::warn;

use box_core::fd;

use crate::config::MountEntry;
use crate::error::{Error, Result};
use crate::mount_options::propagation_to_ms_flags;

const EMPTY: Option<&'static str> = None;

/// Destination node kind to auto-create when the bundle's rootfs lacks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Directory,
    File,
}

fn needs_dir(entry: &MountEntry) -> Result<NodeKind> {
    if entry.is_bind() {
        let source = entry
            .source
            .as_ref()
            .ok_or_else(|| Error::config("bind mount without a source"))?;
        let st = fd::lstat(source)?;
        return Ok(if fd::is_dir(SFlag::from_bits_truncate(st.st_mode)) {
            NodeKind::Directory
        } else {
            NodeKind::File
        });
    }
    match entry.typ.as_deref() {
        Some("proc") | Some("sysfs") | Some("devpts") | Some("tmpfs") | Some("mqueue")
        | Some("cgroup") => Ok(NodeKind::Directory),
        _ => Ok(NodeKind::Directory),
    }
}

/// Ensures the destination exists as the correct node type, auto-creating a
/// directory or a file stub under `root_fd`. Refuses to traverse symlinks
/// that escape the root because every creation step goes through
/// `box_core::fd`'s confined resolver.
fn ensure_destination(root_fd: RawFd, dest: &Path, kind: NodeKind) -> Result<fd::Fd> {
    match kind {
        NodeKind::Directory => Ok(fd::mkdir(root_fd, dest, Mode::from_bits_truncate(0o755))?),
        NodeKind::File => {
            if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
                fd::mkdir(root_fd, parent, Mode::from_bits_truncate(0o755))?;
            }
            let name = dest.file_name().map(Path::new).unwrap_or(dest);
            let parent_fd = match dest.parent().filter(|p| !p.as_os_str().is_empty()) {
                Some(parent) => fd::mkdir(root_fd, parent, Mode::from_bits_truncate(0o755))?,
                None => fd::open_at(
                    root_fd,
                    Path::new("."),
                    nix::fcntl::OFlag::O_PATH | nix::fcntl::OFlag::O_DIRECTORY,
                    Mode::empty(),
                )?,
            };
            Ok(fd::touch(
                parent_fd.as_raw(),
                name,
                nix::fcntl::OFlag::empty(),
                Mode::from_bits_truncate(0o644),
            )?)
        }
    }
}

fn raw_mount(
    source: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    flags: MsFlags,
    data: Option<&str>,
) -> nix::Result<()> {
    nix::mount::mount(source, target, fstype, flags, data)
}

/// A deferred remount, applied after every default filesystem/device is in
/// place (spec §4.C step 4: read-only tmpfs is mounted writable first, then
/// flipped read-only once populated).
pub struct DeferredRemount {
    target: PathBuf,
}

/// Runs the full per-entry algorithm for one configured mount, appending a
/// deferred remount to `deferred` when the entry is a read-only tmpfs.
pub fn setup_mount(root_fd: RawFd, entry: &MountEntry, deferred: &mut Vec<DeferredRemount>) -> Result<()> {
    let dest = entry
        .destination
        .as_deref()
        .ok_or_else(|| Error::config("mount entry is missing a destination"))?;
    let kind = needs_dir(entry)?;
    let dest_fd = ensure_destination(root_fd, dest, kind)?;
    let dest_proc = dest_fd.proc_path();

    if entry.is_bind() {
        let source = entry.source.as_ref().expect("checked by needs_dir");
        raw_mount(Some(source.as_path()), &dest_proc, EMPTY, MsFlags::MS_BIND | MsFlags::MS_REC, None)
            .map_err(Error::from)?;

        let remount_flags = entry.flags & !MsFlags::MS_BIND;
        if !remount_flags.is_empty() || !entry.data.is_empty() {
            let data = (!entry.data.is_empty()).then_some(entry.data.as_str());
            raw_mount(
                None,
                &dest_proc,
                EMPTY,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | remount_flags,
                data,
            )
            .map_err(Error::from)?;
        }

        let prop_ms = propagation_to_ms_flags(entry.propagation);
        if !prop_ms.is_empty() {
            raw_mount(None, &dest_proc, EMPTY, prop_ms, None).map_err(Error::from)?;
        }
        return Ok(());
    }

    let is_readonly_tmpfs =
        entry.typ.as_deref() == Some("tmpfs") && entry.flags.contains(MsFlags::MS_RDONLY);
    if is_readonly_tmpfs {
        let writable_flags = entry.flags & !MsFlags::MS_RDONLY;
        let data = (!entry.data.is_empty()).then_some(entry.data.as_str());
        raw_mount(entry.source.as_deref(), &dest_proc, entry.typ.as_deref(), writable_flags, data)
            .map_err(Error::from)?;
        deferred.push(DeferredRemount { target: dest_proc });
        return Ok(());
    }

    let data = (!entry.data.is_empty()).then_some(entry.data.as_str());
    mount_with_fallback(entry.typ.as_deref(), entry.source.as_deref(), &dest_proc, entry.flags, data)
}

/// Mounts `fstype` at `dest_proc`, retrying as a bind-mount of the matching
/// host filesystem when the primary mount fails and a fallback exists
/// (sysfs -> bind `/sys`, mqueue -> bind `/dev/mqueue`) — the same
/// EPERM-under-rootless recovery for both configured and default mounts.
fn mount_with_fallback(
    fstype: Option<&str>,
    source: Option<&Path>,
    dest_proc: &Path,
    flags: MsFlags,
    data: Option<&str>,
) -> Result<()> {
    let result = raw_mount(source, dest_proc, fstype, flags, data);
    match (fstype, result) {
        (_, Ok(())) => Ok(()),
        (Some("sysfs"), Err(nix::Error::EPERM)) => {
            raw_mount(Some(Path::new("/sys")), dest_proc, EMPTY, MsFlags::MS_BIND | MsFlags::MS_REC, None)
                .map_err(Error::from)
        }
        (Some("mqueue"), Err(_)) => {
            raw_mount(Some(Path::new("/dev/mqueue")), dest_proc, EMPTY, MsFlags::MS_BIND | MsFlags::MS_REC, None)
                .map_err(Error::from)
        }
        (_, Err(e)) => Err(e.into()),
    }
}

/// Applies every deferred read-only remount queued by `setup_mount`. A pure
/// flag flip: `MS_REMOUNT|MS_RDONLY` with no data, not a re-application of
/// the original tmpfs mount options.
pub fn apply_deferred_remounts(deferred: Vec<DeferredRemount>) -> Result<()> {
    for remount in deferred {
        raw_mount(
            None,
            &remount.target,
            EMPTY,
            MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            None,
        )
        .map_err(Error::from)?;
    }
    Ok(())
}

struct DefaultFs {
    path: &'static str,
    fstype: &'static str,
    flags: MsFlags,
    data: Option<&'static str>,
    magic: FsType,
}

fn default_filesystems() -> Vec<DefaultFs> {
    vec![
        DefaultFs {
            path: "proc",
            fstype: "proc",
            flags: MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
            data: None,
            magic: PROC_SUPER_MAGIC,
        },
        DefaultFs {
            path: "sys",
            fstype: "sysfs",
            flags: MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV | MsFlags::MS_RDONLY,
            data: None,
            magic: SYSFS_MAGIC,
        },
        DefaultFs {
            path: "dev",
            fstype: "tmpfs",
            flags: MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
            data: Some("mode=755,size=65536k"),
            magic: TMPFS_MAGIC,
        },
        DefaultFs {
            path: "dev/pts",
            fstype: "devpts",
            flags: MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
            data: Some("newinstance,ptmxmode=0666,mode=0620"),
            magic: FsType(0), // devpts has no single stable magic across kernels; existence is the check
        },
        DefaultFs {
            path: "dev/shm",
            fstype: "tmpfs",
            flags: MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
            data: Some("mode=1777,size=65536k"),
            magic: TMPFS_MAGIC,
        },
    ]
}

/// After the configured mounts are processed, mounts any of
/// `/proc,/sys,/dev,/dev/pts,/dev/shm` not already populated, checked via
/// `statfs` against the expected super-magic value.
pub fn mount_defaults(root_fd: RawFd) -> Result<()> {
    for def in default_filesystems() {
        let dest = fd::mkdir(root_fd, Path::new(def.path), Mode::from_bits_truncate(0o755))?;
        if def.magic.0 != 0 {
            if let Ok(actual) = dest.statfs() {
                if actual == def.magic {
                    continue;
                }
            }
        } else if def.path == "dev/pts" {
            // devpts: treat a non-empty directory as already populated.
            if std::fs::read_dir(format!("/proc/self/fd/{}", dest.as_raw()))
                .map(|mut it| it.next().is_some())
                .unwrap_or(false)
            {
                continue;
            }
        }
        let proc_path = dest.proc_path();
        if let Err(e) = mount_with_fallback(Some(def.fstype), None, &proc_path, def.flags, def.data) {
            warn!(path = def.path, fstype = def.fstype, %e, "default mount and its fallback both failed; continuing");
        }
    }
    Ok(())
}
