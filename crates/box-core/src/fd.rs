//! Owning wrappers around kernel file descriptors, plus confined path
//! resolution rooted in a directory descriptor (spec §4.A).
//!
//! No descriptor handled through this module is ever duplicated implicitly:
//! `Fd` is move-only and closes exactly once on drop.

use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::{Component, Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::{self, FileStat, Mode, SFlag};
use nix::sys::statfs::{statfs, FsType};
use nix::unistd;

use crate::error::FdError;

/// An exclusively-owned kernel file descriptor. Moved, never copied;
/// duplication is an explicit operation (`try_clone`).
#[derive(Debug)]
pub struct Fd(OwnedFd);

impl Fd {
    pub fn from_owned(fd: OwnedFd) -> Self {
        Fd(fd)
    }

    pub fn as_raw(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    /// `/proc/self/fd/N` view of this descriptor. Safe to pass to kernel
    /// calls that need a *path*, as a substitute for the fd itself (bind
    /// mount source/target, for instance), since it is resolved by the
    /// kernel through procfs rather than by a string walk through the
    /// rootfs the caller does not otherwise trust.
    pub fn proc_path(&self) -> PathBuf {
        PathBuf::from(format!("/proc/self/fd/{}", self.as_raw()))
    }

    /// The path this descriptor currently resolves to, per `readlink` of
    /// its proc path. This reflects the *current* kernel-side resolution,
    /// which can differ from whatever path string produced the descriptor
    /// (renames, bind mounts, `..` escapes already rejected at open time).
    pub fn current_path(&self) -> Result<PathBuf, FdError> {
        fcntl::readlink(&self.proc_path()).map(PathBuf::from).map_err(|source| {
            FdError::ReadLink { path: self.proc_path(), source }
        })
    }

    pub fn fstat(&self) -> Result<FileStat, FdError> {
        stat::fstat(self.as_raw()).map_err(|source| FdError::Stat {
            path: self.proc_path(),
            source,
        })
    }

    pub fn statfs(&self) -> Result<FsType, FdError> {
        statfs(&self.proc_path())
            .map(|s| s.filesystem_type())
            .map_err(|source| FdError::Stat { path: self.proc_path(), source })
    }

    pub fn try_clone(&self) -> Result<Fd, FdError> {
        let raw = unistd::dup(self.as_raw()).map_err(|source| FdError::Open {
            path: self.proc_path(),
            source,
        })?;
        Ok(Fd(unsafe { OwnedFd::from_raw_fd(raw) }))
    }

    /// Converts into a `std::fs::File`, consuming this descriptor.
    pub fn into_file(self) -> File {
        File::from(self.0)
    }
}

impl From<Fd> for OwnedFd {
    fn from(fd: Fd) -> OwnedFd {
        fd.0
    }
}

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl IntoRawFd for Fd {
    fn into_raw_fd(self) -> RawFd {
        self.0.into_raw_fd()
    }
}

/// Thin `open(2)` wrapper. Fails with `FdError::Open` on any kernel error.
pub fn open(path: &Path, flags: OFlag, mode: Mode) -> Result<Fd, FdError> {
    let raw = fcntl::open(path, flags, mode).map_err(|source| FdError::Open {
        path: path.to_owned(),
        source,
    })?;
    Ok(Fd(unsafe { OwnedFd::from_raw_fd(raw) }))
}

fn strip_leading_slash(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::RootDir))
        .collect()
}

// SYS_openat2 is not wrapped by `nix`; we issue it directly, matching the
// raw-libc-call idiom the teacher uses for getpwuid_r. `open_how` mirrors
// the kernel ABI (`linux/openat2.h`).
#[repr(C)]
struct OpenHow {
    flags: u64,
    mode: u64,
    resolve: u64,
}

const RESOLVE_IN_ROOT: u64 = 0x08;
const RESOLVE_NO_SYMLINKS: u64 = 0x04;

fn openat2_resolve_in_root(root_fd: RawFd, path: &Path, flags: OFlag, mode: Mode) -> nix::Result<RawFd> {
    let cpath = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| Errno::EINVAL)?;
    let how = OpenHow {
        flags: flags.bits() as u64,
        mode: mode.bits() as u64,
        resolve: RESOLVE_IN_ROOT | RESOLVE_NO_SYMLINKS,
    };
    let ret = unsafe {
        libc::syscall(
            libc::SYS_openat2,
            root_fd,
            cpath.as_ptr(),
            &how as *const OpenHow,
            std::mem::size_of::<OpenHow>(),
        )
    };
    if ret < 0 {
        Err(Errno::last())
    } else {
        Ok(ret as RawFd)
    }
}

/// Path resolution confined to `root_fd`'s subtree (spec §4.A).
///
/// Attempts `openat2` with `RESOLVE_IN_ROOT` first. On `ENOSYS`/`EINVAL`/
/// `EPERM` (older kernels, or kernels where `openat2` is blocked by seccomp)
/// it falls back to plain `openat` after stripping any leading `/` from
/// `path` — the caller's intent is always "relative to root_fd", so an
/// absolute-looking path must not be handed to the kernel as rooted at `/`.
/// `EAGAIN`/`EINTR` are retried rather than surfaced.
pub fn open_at(root_fd: RawFd, path: &Path, flags: OFlag, mode: Mode) -> Result<Fd, FdError> {
    let relative = strip_leading_slash(path);
    loop {
        match openat2_resolve_in_root(root_fd, &relative, flags, mode) {
            Ok(raw) => return Ok(Fd(unsafe { OwnedFd::from_raw_fd(raw) })),
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => continue,
            Err(Errno::ENOSYS) | Err(Errno::EINVAL) | Err(Errno::EPERM) => break,
            Err(source) => {
                return Err(FdError::Resolve { root_fd, path: path.to_owned(), source })
            }
        }
    }

    loop {
        match fcntl::openat(Some(root_fd), &relative, flags, mode) {
            Ok(raw) => return Ok(Fd(unsafe { OwnedFd::from_raw_fd(raw) })),
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => continue,
            Err(source) => {
                return Err(FdError::Resolve { root_fd, path: path.to_owned(), source })
            }
        }
    }
}

/// Create-or-open a regular file under `dir_fd`.
pub fn touch(dir_fd: RawFd, name: &Path, flags: OFlag, mode: Mode) -> Result<Fd, FdError> {
    open_at(dir_fd, name, flags | OFlag::O_CREAT, mode)
}

/// Walks `path` component by component under `root_fd`, creating
/// directories along the way (`EEXIST` is non-fatal), and returns the
/// deepest descriptor opened with `O_PATH`.
pub fn mkdir(root_fd: RawFd, path: &Path, mode: Mode) -> Result<Fd, FdError> {
    let relative = strip_leading_slash(path);
    let mut cur = PathBuf::new();
    let mut last_err = None;
    for comp in relative.components() {
        cur.push(comp);
        match stat::mkdirat(Some(root_fd), &cur, mode) {
            Ok(()) => {}
            Err(Errno::EEXIST) => {}
            Err(e) => last_err = Some((cur.clone(), e)),
        }
    }
    if let Some((p, e)) = last_err {
        return Err(FdError::Mkdir(p, e));
    }
    open_at(
        root_fd,
        &relative,
        OFlag::O_PATH | OFlag::O_DIRECTORY,
        Mode::empty(),
    )
}

pub fn fstatat(dir_fd: RawFd, path: &Path, flags: fcntl::AtFlags) -> Result<FileStat, FdError> {
    stat::fstatat(Some(dir_fd), path, flags).map_err(|source| FdError::Stat {
        path: path.to_owned(),
        source,
    })
}

pub fn lstat(path: &Path) -> Result<FileStat, FdError> {
    stat::lstat(path).map_err(|source| FdError::Stat { path: path.to_owned(), source })
}

pub fn read_symlink(path: &Path) -> Result<PathBuf, FdError> {
    fcntl::readlink(path)
        .map(PathBuf::from)
        .map_err(|source| FdError::ReadLink { path: path.to_owned(), source })
}

pub fn is_dir(mode: SFlag) -> bool {
    mode.contains(SFlag::S_IFDIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::AtFlags;

    #[test]
    fn mkdir_walks_components_and_ignores_eexist() {
        let tmp = tempfile::tempdir().unwrap();
        let root = open(tmp.path(), OFlag::O_DIRECTORY | OFlag::O_RDONLY, Mode::empty()).unwrap();
        let deep = mkdir(root.as_raw(), Path::new("a/b/c"), Mode::from_bits_truncate(0o755)).unwrap();
        assert!(tmp.path().join("a/b/c").is_dir());
        // second call must not fail despite EEXIST on every component
        let deep2 = mkdir(root.as_raw(), Path::new("a/b/c"), Mode::from_bits_truncate(0o755)).unwrap();
        assert_eq!(deep.current_path().unwrap(), deep2.current_path().unwrap());
    }

    #[test]
    fn open_at_strips_leading_slash() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("x"), b"hi").unwrap();
        let root = open(tmp.path(), OFlag::O_DIRECTORY | OFlag::O_RDONLY, Mode::empty()).unwrap();
        let f = open_at(root.as_raw(), Path::new("/x"), OFlag::O_RDONLY, Mode::empty()).unwrap();
        let st = f.fstat().unwrap();
        assert!(st.st_size >= 2);
    }

    #[test]
    fn fstatat_reports_directory_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let root = open(tmp.path(), OFlag::O_DIRECTORY | OFlag::O_RDONLY, Mode::empty()).unwrap();
        let st = fstatat(root.as_raw(), Path::new("."), AtFlags::empty()).unwrap();
        assert!(is_dir(SFlag::from_bits_truncate(st.st_mode)));
    }
}
