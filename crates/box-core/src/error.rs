use std::path::PathBuf;

/// The five error kinds the orchestrator classifies every failure into
/// (spec §7). `box-core` only ever produces `Io` and `Config` failures;
/// `Protocol`/`Hook`/`State` are produced by `box-container`, but the kind
/// enum lives here so every crate in the workspace agrees on the taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Io,
    Protocol,
    Hook,
    State,
}

#[derive(Debug, thiserror::Error)]
pub enum FdError {
    #[error("failed to open {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("failed to resolve {path:?} under root fd {root_fd}")]
    Resolve {
        root_fd: i32,
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("path {0:?} escapes the confined root")]
    Escape(PathBuf),
    #[error("failed to stat {path:?}")]
    Stat {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("failed to read symlink {path:?}")]
    ReadLink {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("failed to create directory component {0:?}")]
    Mkdir(PathBuf, #[source] nix::Error),
}

impl FdError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Io
    }
}
