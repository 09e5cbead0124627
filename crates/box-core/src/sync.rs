//! The parent/child synchronization channel (spec §3 "Sync message", §4.B).
//!
//! A symmetric `SOCK_SEQPACKET` pair, created before the clone. Every
//! control message is exactly one byte on the wire; reads are blocking.
//! This is deliberately *not* the teacher's `channel.rs`, which frames
//! arbitrary `serde_json` payloads behind a length prefix — this protocol
//! is closed and total, so a fixed one-byte enum is both sufficient and
//! cheaper to reason about (testable property 3: sync protocol totality).

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags, UnixAddr};
use nix::unistd;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("unexpected sync message: expected {expected:?}, got {got:?}")]
    Unexpected { expected: SyncMessage, got: SyncMessage },
    #[error("sync socket closed before sending {expected:?}")]
    ClosedEarly { expected: SyncMessage },
    #[error("sync socket received unrecognized byte {0}")]
    Garbage(u8),
    #[error("sync socket is expected to close but received data")]
    ExpectedClose,
    #[error(transparent)]
    Io(#[from] nix::Error),
}

impl SyncError {
    pub fn kind(&self) -> crate::error::ErrorKind {
        crate::error::ErrorKind::Protocol
    }
}

/// One-byte control messages exchanged between the runtime-side parent and
/// the container-side child, in the total order described by spec §4.H.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncMessage {
    RequestConfigureNamespace = 1,
    NamespaceConfigured = 2,
    RequestCreateRuntimeHooks = 3,
    CreateRuntimeHooksExecuted = 4,
    CreateContainerHooksExecuted = 5,
    StartContainerHooksExecuted = 6,
}

impl TryFrom<u8> for SyncMessage {
    type Error = SyncError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            1 => Ok(Self::RequestConfigureNamespace),
            2 => Ok(Self::NamespaceConfigured),
            3 => Ok(Self::RequestCreateRuntimeHooks),
            4 => Ok(Self::CreateRuntimeHooksExecuted),
            5 => Ok(Self::CreateContainerHooksExecuted),
            6 => Ok(Self::StartContainerHooksExecuted),
            other => Err(SyncError::Garbage(other)),
        }
    }
}

/// One endpoint of the sync socket pair. Both endpoints use the same type;
/// the protocol is symmetric, only the message sequence each side sends vs.
/// expects differs (spec §4.H).
pub struct SyncSocket(OwnedFd);

impl SyncSocket {
    pub fn pair() -> Result<(SyncSocket, SyncSocket), SyncError> {
        let (a, b) = socket::socketpair(
            socket::AddressFamily::Unix,
            socket::SockType::SeqPacket,
            None,
            socket::SockFlag::SOCK_CLOEXEC,
        )?;
        Ok((SyncSocket(a), SyncSocket(b)))
    }

    pub fn as_raw(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    pub fn send(&mut self, message: SyncMessage) -> Result<(), SyncError> {
        let byte = [message as u8];
        unistd::write(&self.0, &byte)?;
        Ok(())
    }

    /// Blocks for the next byte; fails with `Unexpected` if it does not
    /// match `message`, or `ClosedEarly` on an orderly zero-length read.
    pub fn expect(&mut self, message: SyncMessage) -> Result<(), SyncError> {
        let mut buf = [0u8; 1];
        let n = unistd::read(self.0.as_raw_fd(), &mut buf)?;
        if n == 0 {
            return Err(SyncError::ClosedEarly { expected: message });
        }
        let got = SyncMessage::try_from(buf[0])?;
        if got as u8 != message as u8 {
            return Err(SyncError::Unexpected { expected: message, got });
        }
        Ok(())
    }

    /// Blocks until the peer closes its end (the child has `exec`'d, or
    /// the parent is tearing down). A zero-length read is "proceed"; any
    /// other outcome (a byte arrived instead, or a kernel error) is fatal.
    pub fn wait_close(&mut self) -> Result<(), SyncError> {
        let mut buf = [0u8; 1];
        let n = unistd::read(self.0.as_raw_fd(), &mut buf)?;
        if n != 0 {
            return Err(SyncError::ExpectedClose);
        }
        Ok(())
    }

    /// Sends a one-byte message carrying a set of file descriptors via
    /// `SCM_RIGHTS` (used to hand the PTY slave across at `exec` time,
    /// spec §4.F).
    pub fn send_fds(&mut self, message: SyncMessage, fds: &[RawFd]) -> Result<(), SyncError> {
        let byte = [message as u8];
        let iov = [IoSlice::new(&byte)];
        let cmsg = [ControlMessage::ScmRights(fds)];
        socket::sendmsg::<UnixAddr>(self.0.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)?;
        Ok(())
    }

    pub fn expect_with_fds<const N: usize>(
        &mut self,
        message: SyncMessage,
    ) -> Result<[RawFd; N], SyncError> {
        let mut buf = [0u8; 1];
        let mut iov = [IoSliceMut::new(&mut buf)];
        let mut cmsg_space = nix::cmsg_space!([RawFd; N]);
        let msg = socket::recvmsg::<UnixAddr>(
            self.0.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_space),
            MsgFlags::MSG_CMSG_CLOEXEC,
        )?;
        if msg.bytes == 0 {
            return Err(SyncError::ClosedEarly { expected: message });
        }
        let mut fds = [-1; N];
        for cmsg in msg.cmsgs() {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                for (slot, fd) in fds.iter_mut().zip(received.into_iter()) {
                    *slot = fd;
                }
            }
        }
        drop(msg);
        let got = SyncMessage::try_from(buf[0])?;
        if got as u8 != message as u8 {
            return Err(SyncError::Unexpected { expected: message, got });
        }
        Ok(fds)
    }

    /// Explicit close, distinct from drop, so callers can observe failures
    /// (the fd is also closed implicitly when `OwnedFd` drops).
    pub fn close(self) {
        drop(self)
    }
}

impl From<OwnedFd> for SyncSocket {
    fn from(fd: OwnedFd) -> Self {
        SyncSocket(fd)
    }
}

#[allow(dead_code)]
fn from_raw(raw: RawFd) -> SyncSocket {
    SyncSocket(unsafe { OwnedFd::from_raw_fd(raw) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_expected_sequence() {
        let (mut parent, mut child) = SyncSocket::pair().unwrap();
        child.send(SyncMessage::RequestConfigureNamespace).unwrap();
        parent.expect(SyncMessage::RequestConfigureNamespace).unwrap();
        parent.send(SyncMessage::NamespaceConfigured).unwrap();
        child.expect(SyncMessage::NamespaceConfigured).unwrap();
    }

    #[test]
    fn unexpected_message_is_protocol_error() {
        let (mut parent, mut child) = SyncSocket::pair().unwrap();
        child.send(SyncMessage::CreateContainerHooksExecuted).unwrap();
        let err = parent.expect(SyncMessage::RequestConfigureNamespace).unwrap_err();
        assert!(matches!(err, SyncError::Unexpected { .. }));
    }

    #[test]
    fn close_before_expected_message_is_distinguished() {
        let (mut parent, child) = SyncSocket::pair().unwrap();
        drop(child);
        let err = parent.expect(SyncMessage::RequestConfigureNamespace).unwrap_err();
        assert!(matches!(err, SyncError::ClosedEarly { .. }));
    }

    #[test]
    fn wait_close_succeeds_on_orderly_shutdown() {
        let (mut parent, child) = SyncSocket::pair().unwrap();
        drop(child);
        parent.wait_close().unwrap();
    }

    #[test]
    fn wait_close_fails_if_data_arrives_instead() {
        let (mut parent, mut child) = SyncSocket::pair().unwrap();
        child.send(SyncMessage::NamespaceConfigured).unwrap();
        let err = parent.wait_close().unwrap_err();
        assert!(matches!(err, SyncError::ExpectedClose));
    }
}
