//! Status-directory root resolution (spec §6 "Global flags" — `--root`,
//! `XDG_RUNTIME_DIR`). Grounded on `youki::rootpath::determine`, trimmed to
//! this runtime's single documented default instead of the teacher's
//! rootless-vs-system multi-fallback chain (that chain exists because `runc`
//! compatibility requires `/run/user/$uid` *and* `$HOME/.youki/run` *and*
//! `/tmp` fallbacks; this spec names exactly one default).

use std::path::PathBuf;

use anyhow::{Context, Result};
use nix::sys::stat::Mode;
use nix::unistd::getuid;

pub fn determine(root: Option<PathBuf>) -> Result<PathBuf> {
    let path = match root {
        Some(path) => path,
        None => default_root(),
    };
    create_dir_all_mode(&path, Mode::S_IRWXU).with_context(|| format!("failed to create {path:?}"))?;
    path.canonicalize().with_context(|| format!("failed to canonicalize {path:?}"))
}

fn default_root() -> PathBuf {
    let base = std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(format!("/tmp/linyaps-box-{}", getuid())));
    base.join("linglong/box")
}

fn create_dir_all_mode(path: &std::path::Path, mode: Mode) -> Result<()> {
    std::fs::create_dir_all(path)?;
    nix::sys::stat::fchmodat(None, path, mode, nix::sys::stat::FchmodatFlags::FollowSymlink)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_root_is_created_and_canonicalized() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("explicit/root");
        let resolved = determine(Some(target.clone())).unwrap();
        assert_eq!(resolved, target.canonicalize().unwrap());
    }

    #[test]
    fn default_root_ends_in_linglong_box() {
        assert!(default_root().ends_with("linglong/box"));
    }
}
