//! Non-blocking ring-buffer I/O forwarder with an explicit state machine
//! (spec §4.G). Grounded on
//! `original_source/src/linyaps_box/io/forwarder.cpp`'s `Forwarder::Status`
//! shape, re-expressed with the four named states spec §4.G gives instead of
//! the original's `Continue/Blocked/Finished`.

use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::RawFd;

use super::ringbuffer::{RingBuffer, DEFAULT_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderState {
    Idle,
    Busy,
    SourceClosed,
    Finished,
}

pub struct Forwarder {
    source: RawFd,
    dest: RawFd,
    buffer: RingBuffer,
    state: ForwarderState,
}

impl Forwarder {
    pub fn new(source: RawFd, dest: RawFd) -> Self {
        Forwarder {
            source,
            dest,
            buffer: RingBuffer::with_capacity(DEFAULT_CAPACITY),
            state: ForwarderState::Idle,
        }
    }

    pub fn state(&self) -> ForwarderState {
        self.state
    }

    pub fn source_fd(&self) -> RawFd {
        self.source
    }

    pub fn dest_fd(&self) -> RawFd {
        self.dest
    }

    /// Called when `source` is readable. Fills the ring buffer until it is
    /// full or the source returns `EAGAIN`; an EOF (zero-length read)
    /// transitions to `SourceClosed`.
    pub fn on_source_readable(&mut self) -> io::Result<()> {
        if self.state == ForwarderState::Finished {
            return Ok(());
        }
        loop {
            if self.buffer.is_full() {
                self.state = ForwarderState::Busy;
                return Ok(());
            }
            let mut tmp = [0u8; 4096];
            let want = tmp.len().min(self.buffer.free_space());
            match read_raw(self.source, &mut tmp[..want]) {
                Ok(0) => {
                    self.state = ForwarderState::SourceClosed;
                    self.finish_if_drained();
                    return Ok(());
                }
                Ok(n) => {
                    self.buffer.write(&tmp[..n]);
                    self.state = ForwarderState::Busy;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if self.buffer.is_empty() {
                        self.state = ForwarderState::Idle;
                    }
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Called when `dest` is writable. Drains the ring buffer until empty or
    /// the destination returns `EAGAIN`.
    pub fn on_dest_writable(&mut self) -> io::Result<()> {
        loop {
            if self.buffer.is_empty() {
                self.finish_if_drained();
                return Ok(());
            }
            let dest = self.dest;
            let result = self.buffer.drain_with(|chunk| write_raw(dest, chunk));
            match result {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn finish_if_drained(&mut self) {
        if self.state == ForwarderState::SourceClosed && self.buffer.is_empty() {
            self.state = ForwarderState::Finished;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == ForwarderState::Finished
    }

    /// Forces this forwarder to `Finished` regardless of buffered bytes.
    /// Used when the peer it feeds is known to be gone (container init
    /// reaped: its stdin no longer exists for the host-in forwarder to
    /// deliver to).
    pub fn force_finish(&mut self) {
        self.state = ForwarderState::Finished;
    }
}

fn read_raw(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let mut file = unsafe { std::mem::ManuallyDrop::new(<std::fs::File as std::os::fd::FromRawFd>::from_raw_fd(fd)) };
    file.read(buf)
}

fn write_raw(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let mut file = unsafe { std::mem::ManuallyDrop::new(<std::fs::File as std::os::fd::FromRawFd>::from_raw_fd(fd)) };
    file.write(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    use nix::unistd::{close, pipe};
    use std::os::fd::{AsRawFd, IntoRawFd};

    fn set_nonblocking(fd: RawFd) {
        let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL).unwrap());
        fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).unwrap();
    }

    #[test]
    fn forwards_bytes_and_reaches_finished_on_eof() {
        let (src_r, src_w) = pipe().unwrap();
        let (dst_r, dst_w) = pipe().unwrap();
        let src_r = src_r.into_raw_fd();
        let src_w_fd = src_w.as_raw_fd();
        let dst_w = dst_w.into_raw_fd();
        let dst_r_fd = dst_r.as_raw_fd();
        set_nonblocking(src_r);
        set_nonblocking(dst_w);

        nix::unistd::write(&src_w, b"hi").unwrap();
        close(src_w.into_raw_fd()).ok(); // EOF on src_r after the buffered bytes drain

        let mut fwd = Forwarder::new(src_r, dst_w);
        fwd.on_source_readable().unwrap();
        assert_eq!(fwd.state(), ForwarderState::SourceClosed);
        fwd.on_dest_writable().unwrap();
        assert!(fwd.is_finished());

        let mut out = [0u8; 8];
        let n = nix::unistd::read(dst_r_fd, &mut out).unwrap();
        assert_eq!(&out[..n], b"hi");
        let _ = src_w_fd;
    }
}
