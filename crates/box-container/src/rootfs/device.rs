//! Default device nodes (spec §4.C "Default devices"), grounded on
//! `libcontainer::rootfs::device::create_devices`.

use std::os::fd::RawFd;
use std::path::Path;

use nix::fcntl::OFlag;
use nix::sys::stat::{makedev, mknod, Mode, SFlag};
use nix::unistd;
use tracing::warn;

use box_core::fd;

use crate::error::Result;

struct DefaultDevice {
    name: &'static str,
    major: u64,
    minor: u64,
}

const DEFAULT_DEVICES: &[DefaultDevice] = &[
    DefaultDevice { name: "null", major: 1, minor: 3 },
    DefaultDevice { name: "zero", major: 1, minor: 5 },
    DefaultDevice { name: "full", major: 1, minor: 7 },
    DefaultDevice { name: "random", major: 1, minor: 8 },
    DefaultDevice { name: "urandom", major: 1, minor: 9 },
    DefaultDevice { name: "tty", major: 5, minor: 0 },
];

/// Either `mknod`s each default char device under `/dev`, or, on `EPERM`
/// (typical rootless case), recursively bind-mounts the host device in.
pub fn create_default_devices(dev_fd: RawFd) -> Result<()> {
    for dev in DEFAULT_DEVICES {
        let path = Path::new(dev.name);
        match mknodat(dev_fd, path, SFlag::S_IFCHR, Mode::from_bits_truncate(0o666), dev.major, dev.minor) {
            Ok(()) => continue,
            Err(nix::Error::EPERM) => bind_host_device(dev_fd, dev.name)?,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn mknodat(
    dir_fd: RawFd,
    path: &Path,
    kind: SFlag,
    mode: Mode,
    major: u64,
    minor: u64,
) -> nix::Result<()> {
    let cpath = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| nix::Error::EINVAL)?;
    let dev = makedev(major, minor);
    let rc = unsafe {
        libc::mknodat(dir_fd, cpath.as_ptr(), kind.bits() | mode.bits(), dev)
    };
    if rc != 0 {
        return Err(nix::Error::last());
    }
    Ok(())
}

fn bind_host_device(dev_fd: RawFd, name: &str) -> Result<()> {
    let host_path = std::ffi::CString::new(format!("/dev/{name}")).unwrap();
    let dest = fd::touch(dev_fd, Path::new(name), OFlag::empty(), Mode::from_bits_truncate(0o666))?;
    let dest_path = std::ffi::CString::new(dest.proc_path().as_os_str().as_encoded_bytes()).unwrap();
    let rc = unsafe {
        libc::mount(
            host_path.as_ptr(),
            dest_path.as_ptr(),
            std::ptr::null(),
            libc::MS_BIND,
            std::ptr::null(),
        )
    };
    if rc != 0 {
        let errno = nix::Error::last();
        warn!(device = name, %errno, "falling back bind mount of default device failed");
        return Ok(());
    }
    Ok(())
}
