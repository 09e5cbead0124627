//! Cgroup-manager collaborator (spec §9 "Polymorphism over cgroup managers
//! and printers": a capability set dispatched by tag, not inheritance).
//! Grounded on `original_source/src/linyaps_box/impl/
//! disabled_cgroup_manager.cpp` — the only variant this runtime implements.

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};

/// `{create, precreate, destroy}` capability set. Dispatch is by tag
/// (`CgroupManager` enum) rather than a trait object, matching §9's note
/// that this polymorphism is closed, not open-ended.
pub trait CgroupOps {
    fn precreate(&self, config: &RuntimeConfig) -> Result<()>;
    fn create(&self, pid: nix::unistd::Pid, config: &RuntimeConfig) -> Result<()>;
    fn destroy(&self) -> Result<()>;
}

pub struct Disabled;

impl CgroupOps for Disabled {
    fn precreate(&self, _config: &RuntimeConfig) -> Result<()> {
        Ok(())
    }

    fn create(&self, _pid: nix::unistd::Pid, _config: &RuntimeConfig) -> Result<()> {
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        Ok(())
    }
}

/// The `--cgroup-manager` CLI value, resolved at startup. `Cgroupfs` and
/// `Systemd` are accepted as documented values but have no implementation:
/// resolving to a `Config` error keeps the surface forward-compatible
/// without silently no-op'ing work the user explicitly asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupManagerKind {
    Disabled,
    Cgroupfs,
    Systemd,
}

impl std::str::FromStr for CgroupManagerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "disabled" => Ok(CgroupManagerKind::Disabled),
            "cgroupfs" => Ok(CgroupManagerKind::Cgroupfs),
            "systemd" => Ok(CgroupManagerKind::Systemd),
            other => Err(Error::config(format!("unknown cgroup manager {other:?}"))),
        }
    }
}

pub fn resolve(kind: CgroupManagerKind) -> Result<Box<dyn CgroupOps>> {
    match kind {
        CgroupManagerKind::Disabled => Ok(Box::new(Disabled)),
        CgroupManagerKind::Cgroupfs | CgroupManagerKind::Systemd => Err(Error::config(
            "cgroup manager is recognized but not implemented by this runtime",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_manager_is_always_a_no_op() {
        let mgr = resolve(CgroupManagerKind::Disabled).unwrap();
        mgr.destroy().unwrap();
    }

    #[test]
    fn cgroupfs_and_systemd_are_recognized_but_rejected() {
        assert!(resolve(CgroupManagerKind::Cgroupfs).is_err());
        assert!(resolve(CgroupManagerKind::Systemd).is_err());
    }

    #[test]
    fn unknown_value_is_a_config_error_at_parse_time() {
        let err = "bogus".parse::<CgroupManagerKind>().unwrap_err();
        assert_eq!(err.kind(), box_core::ErrorKind::Config);
    }
}
