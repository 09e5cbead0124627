//! The crate-wide error enum. Every variant maps onto one of the five error
//! kinds from spec §7 (`Config`/`Io`/`Protocol`/`Hook`/`State`), so the
//! binary can choose an exit code family without downcasting.

use box_core::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("kernel call failed: {0}")]
    Io(#[from] nix::Error),
    #[error(transparent)]
    Sync(#[from] box_core::SyncError),
    #[error(transparent)]
    Fd(#[from] box_core::error::FdError),
    #[error("hook failed: {0}")]
    Hook(String),
    #[error("illegal state transition: {0}")]
    State(String),
    #[error("std::io error: {0}")]
    StdIo(#[from] std::io::Error),
    #[error("failed to (de)serialize: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) | Error::StdIo(_) | Error::Serde(_) => ErrorKind::Io,
            Error::Sync(_) => ErrorKind::Protocol,
            Error::Fd(e) => e.kind(),
            Error::Hook(_) => ErrorKind::Hook,
            Error::State(_) => ErrorKind::State,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn hook(msg: impl Into<String>) -> Self {
        Error::Hook(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Error::State(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
