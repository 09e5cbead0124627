use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

/// A `UID[:GID]` value as accepted by `-u/--user`. A bare UID leaves the
/// group unspecified, which callers resolve to the target process's own gid
/// rather than defaulting it to root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserSpec {
    pub uid: u32,
    pub gid: Option<u32>,
}

impl FromStr for UserSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((uid, gid)) => Ok(UserSpec {
                uid: uid.parse().map_err(|_| format!("invalid uid {uid:?}"))?,
                gid: Some(gid.parse().map_err(|_| format!("invalid gid {gid:?}"))?),
            }),
            None => Ok(UserSpec { uid: s.parse().map_err(|_| format!("invalid uid {s:?}"))?, gid: None }),
        }
    }
}

/// Execute an additional process inside a running container.
#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Current working directory of the executed process, relative to the container's rootfs.
    #[clap(long)]
    pub cwd: Option<PathBuf>,
    /// User to run the process as, as `UID` or `UID:GID`.
    #[clap(short, long)]
    pub user: Option<UserSpec>,
    /// Identifier of the target container.
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub container_id: String,
    /// Command and arguments to execute inside the container.
    #[clap(required = true)]
    pub command: Vec<String>,
}
