//! PTY allocation on the parent side (spec §4.F terminal branch). Grounded
//! on `libcontainer::tty::setup_console`, generalized to hand the slave fd
//! to `box_core::sync::SyncSocket::send_fds` instead of the teacher's
//! `scm_listener` channel.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::fcntl::{open, OFlag};
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
use nix::sys::stat::Mode;

use crate::error::Result;

pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

/// Opens `/dev/ptmx`, unlocks it, and opens the slave side by name.
pub fn allocate() -> Result<PtyPair> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)?;
    grantpt(&master)?;
    unlockpt(&master)?;
    let slave_name = ptsname_r(&master)?;
    let slave_fd = open(slave_name.as_str(), OFlag::O_RDWR | OFlag::O_NOCTTY, Mode::empty())?;
    let slave = unsafe { OwnedFd::from_raw_fd(slave_fd) };
    Ok(PtyPair { master: master.into(), slave })
}

pub fn set_winsize(fd: RawFd, rows: u16, cols: u16) -> Result<()> {
    let ws = libc::winsize { ws_row: rows, ws_col: cols, ws_xpixel: 0, ws_ypixel: 0 };
    let rc = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &ws) };
    if rc != 0 {
        return Err(nix::Error::last().into());
    }
    Ok(())
}

pub fn get_winsize(fd: RawFd) -> Result<(u16, u16)> {
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) };
    if rc != 0 {
        return Err(nix::Error::last().into());
    }
    Ok((ws.ws_row, ws.ws_col))
}

/// Puts the host terminal referred to by `fd` into raw mode, returning the
/// original settings so the supervisor can restore them on exit.
pub fn set_raw_mode(fd: RawFd) -> Result<nix::sys::termios::Termios> {
    use nix::sys::termios::{self, SetArg};
    let original = termios::tcgetattr(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) })?;
    let mut raw = original.clone();
    termios::cfmakeraw(&mut raw);
    termios::tcsetattr(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, SetArg::TCSANOW, &raw)?;
    Ok(original)
}

pub fn restore_mode(fd: RawFd, original: &nix::sys::termios::Termios) -> Result<()> {
    use nix::sys::termios::{tcsetattr, SetArg};
    tcsetattr(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, SetArg::TCSANOW, original)?;
    Ok(())
}

pub fn as_raw(fd: &OwnedFd) -> RawFd {
    fd.as_raw_fd()
}
