//! UID/GID map installation (spec §4.D, parent side). Grounded on
//! `libcontainer::namespaces::Namespaces::set_id_mappings` / the teacher's
//! shelling out to `newuidmap`/`newgidmap`, with the 1:1 direct-write
//! fallback the spec calls out explicitly.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use nix::unistd::Pid;
use tracing::debug;

use crate::config::IdMapping;
use crate::error::{Error, Result};

fn format_triples(mappings: &[IdMapping]) -> Vec<String> {
    mappings
        .iter()
        .flat_map(|m| [m.container_id.to_string(), m.host_id.to_string(), m.size.to_string()])
        .collect()
}

fn is_identity_1to1(mappings: &[IdMapping], own_id: u32) -> bool {
    mappings.len() == 1 && mappings[0].size == 1 && mappings[0].host_id == own_id
}

/// Installs uid and gid maps for `pid`'s user namespace. For a single 1:1
/// mapping to the caller's own id, writes `/proc/<pid>/{u,g}id_map`
/// directly; otherwise shells out to `newuidmap`/`newgidmap`, which alone
/// are permitted to install ranges beyond the caller's own id.
pub fn install_id_maps(pid: Pid, uid_mappings: &[IdMapping], gid_mappings: &[IdMapping]) -> Result<()> {
    if uid_mappings.is_empty() && gid_mappings.is_empty() {
        return Ok(());
    }

    // setgroups must be denied before gid_map can be written without
    // CAP_SETGID, per user_namespaces(7).
    write_proc_file(pid, "setgroups", "deny")?;

    if is_identity_1to1(uid_mappings, nix::unistd::getuid().as_raw()) {
        write_id_map(pid, "uid_map", uid_mappings)?;
    } else {
        run_helper("newuidmap", pid, uid_mappings)?;
    }

    if is_identity_1to1(gid_mappings, nix::unistd::getgid().as_raw()) {
        write_id_map(pid, "gid_map", gid_mappings)?;
    } else {
        run_helper("newgidmap", pid, gid_mappings)?;
    }

    Ok(())
}

fn proc_file(pid: Pid, name: &str) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/{name}"))
}

fn write_proc_file(pid: Pid, name: &str, contents: &str) -> Result<()> {
    // ENOENT (older kernels lack /proc/<pid>/setgroups) is not fatal.
    match std::fs::write(proc_file(pid, name), contents) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::config(format!("writing {name}: {e}"))),
    }
}

fn write_id_map(pid: Pid, name: &str, mappings: &[IdMapping]) -> Result<()> {
    let mut body = String::new();
    for m in mappings {
        body.push_str(&format!("{} {} {}\n", m.container_id, m.host_id, m.size));
    }
    let path = proc_file(pid, name);
    let mut f = std::fs::OpenOptions::new().write(true).open(&path)?;
    f.write_all(body.as_bytes())?;
    Ok(())
}

fn run_helper(helper: &str, pid: Pid, mappings: &[IdMapping]) -> Result<()> {
    debug!(helper, pid = pid.as_raw(), "installing id map via helper");
    let mut cmd = Command::new(helper);
    cmd.arg(pid.as_raw().to_string());
    cmd.args(format_triples(mappings));
    let status = cmd
        .status()
        .map_err(|e| Error::config(format!("spawning {helper}: {e}")))?;
    if !status.success() {
        return Err(Error::config(format!("{helper} exited with {status}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_mapping_detection() {
        let own = nix::unistd::getuid().as_raw();
        let identity = vec![IdMapping { host_id: own, container_id: 0, size: 1 }];
        assert!(is_identity_1to1(&identity, own));

        let range = vec![IdMapping { host_id: 100000, container_id: 0, size: 65536 }];
        assert!(!is_identity_1to1(&range, own));
    }

    #[test]
    fn format_triples_flattens_in_container_host_size_order() {
        let mappings = vec![
            IdMapping { host_id: 1000, container_id: 0, size: 1 },
            IdMapping { host_id: 100000, container_id: 1, size: 65536 },
        ];
        assert_eq!(
            format_triples(&mappings),
            vec!["0", "1000", "1", "1", "100000", "65536"]
        );
    }
}
