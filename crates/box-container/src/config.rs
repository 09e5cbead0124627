//! Projects a parsed OCI `Spec` (the CLI front-end's collaborator, spec §1)
//! into the smaller `RuntimeConfig` the core pipeline actually consumes
//! (spec §3 "Configuration"). Grounded on `libcontainer::config::YoukiConfig`,
//! which performs the same "receive already-parsed oci_spec::Spec, narrow it
//! down" step, persisted alongside the container's status record so later
//! `exec`/`kill`/`list` invocations do not need the original bundle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use oci_spec::runtime::{
    Hook, LinuxCapabilities, LinuxDeviceCgroup, LinuxIdMapping, LinuxNamespaceType, PosixRlimit,
    Spec,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mount_options::{self, ExtensionFlags, PropagationFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamespaceKind {
    Mount,
    Pid,
    Network,
    Ipc,
    Uts,
    User,
    Cgroup,
}

impl From<LinuxNamespaceType> for NamespaceKind {
    fn from(t: LinuxNamespaceType) -> Self {
        match t {
            LinuxNamespaceType::Mount => NamespaceKind::Mount,
            LinuxNamespaceType::Pid => NamespaceKind::Pid,
            LinuxNamespaceType::Network => NamespaceKind::Network,
            LinuxNamespaceType::Ipc => NamespaceKind::Ipc,
            LinuxNamespaceType::Uts => NamespaceKind::Uts,
            LinuxNamespaceType::User => NamespaceKind::User,
            LinuxNamespaceType::Cgroup => NamespaceKind::Cgroup,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceEntry {
    pub kind: NamespaceKind,
    /// Join an existing namespace at this path instead of creating one.
    pub join_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdMapping {
    pub host_id: u32,
    pub container_id: u32,
    pub size: u32,
}

impl From<&LinuxIdMapping> for IdMapping {
    fn from(m: &LinuxIdMapping) -> Self {
        IdMapping {
            host_id: m.host_id(),
            container_id: m.container_id(),
            size: m.size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountEntry {
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub typ: Option<String>,
    #[serde(skip, default)]
    pub flags: nix::mount::MsFlags,
    #[serde(skip, default)]
    pub propagation: PropagationFlags,
    #[serde(skip, default)]
    pub extension: ExtensionFlags,
    pub data: String,
}

impl MountEntry {
    pub fn is_bind(&self) -> bool {
        self.flags.contains(nix::mount::MsFlags::MS_BIND)
    }

    fn from_spec(m: &oci_spec::runtime::Mount) -> Result<Self> {
        let parsed = mount_options::parse(m.options().as_deref().unwrap_or_default());
        let typ = m.typ().clone();
        let is_bind = parsed.flags.contains(nix::mount::MsFlags::MS_BIND) || typ.as_deref() == Some("bind");
        if is_bind && m.source().is_none() {
            return Err(Error::config(format!(
                "bind mount at {:?} is missing a source",
                m.destination()
            )));
        }
        if !is_bind && m.destination().as_os_str().is_empty() {
            return Err(Error::config("mount entry is missing a destination"));
        }
        Ok(MountEntry {
            source: m.source().clone(),
            destination: Some(m.destination().clone()),
            typ,
            flags: parsed.flags,
            propagation: parsed.propagation,
            extension: parsed.extension,
            data: parsed.data,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootfsPropagation {
    Shared,
    Slave,
    Private,
    Unbindable,
}

impl RootfsPropagation {
    fn parse(value: Option<&str>) -> Result<Self> {
        Ok(match value {
            Some("shared") => RootfsPropagation::Shared,
            Some("private") => RootfsPropagation::Private,
            Some("slave") | None => RootfsPropagation::Slave,
            Some("unbindable") => RootfsPropagation::Unbindable,
            Some(other) => {
                return Err(Error::config(format!("unknown rootfsPropagation {other:?}")))
            }
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookSet {
    pub prestart: Vec<Hook>,
    pub create_runtime: Vec<Hook>,
    pub create_container: Vec<Hook>,
    pub start_container: Vec<Hook>,
    pub poststart: Vec<Hook>,
    pub poststop: Vec<Hook>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub additional_gids: Vec<u32>,
    pub terminal: bool,
    pub console_size: Option<(u32, u32)>,
    pub rlimits: Vec<PosixRlimit>,
    pub capabilities: Option<LinuxCapabilities>,
    pub no_new_privileges: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootConfig {
    pub path: PathBuf,
    pub readonly: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub process: ProcessConfig,
    pub root: RootConfig,
    pub mounts: Vec<MountEntry>,
    pub namespaces: Vec<NamespaceEntry>,
    pub uid_mappings: Vec<IdMapping>,
    pub gid_mappings: Vec<IdMapping>,
    pub hooks: HookSet,
    pub masked_paths: Vec<PathBuf>,
    pub readonly_paths: Vec<PathBuf>,
    pub rootfs_propagation: RootfsPropagation,
    pub annotations: HashMap<String, String>,
    pub oci_version: String,
    /// Bitset computed from `linux.resources.devices` etc. is out of scope
    /// (cgroup I/O is a non-goal); retained verbatim for forward
    /// compatibility with a future cgroup manager.
    pub device_cgroup_rules: Vec<LinuxDeviceCgroup>,
}

impl RuntimeConfig {
    pub fn from_spec(spec: &Spec, bundle: &Path) -> Result<Self> {
        let process = spec
            .process()
            .as_ref()
            .ok_or_else(|| Error::config("spec is missing `process`"))?;
        let user = process.user();

        let mut env: Vec<String> = Vec::new();
        let mut seen_keys = std::collections::HashSet::new();
        for entry in process.env().clone().unwrap_or_default() {
            let key = entry.split('=').next().unwrap_or(&entry).to_string();
            if !seen_keys.insert(key.clone()) {
                return Err(Error::config(format!("duplicate env key {key:?}")));
            }
            env.push(entry);
        }

        let cwd = process.cwd().clone();
        if !cwd.is_absolute() {
            return Err(Error::config(format!("process.cwd {cwd:?} must be absolute")));
        }

        let linux = spec
            .linux()
            .as_ref()
            .ok_or_else(|| Error::config("spec is missing `linux`"))?;

        let mut seen_kinds = std::collections::HashSet::new();
        let mut namespaces = Vec::new();
        for ns in linux.namespaces().clone().unwrap_or_default() {
            let kind = NamespaceKind::from(ns.typ());
            if !seen_kinds.insert(kind) {
                return Err(Error::config(format!("duplicate namespace kind {kind:?}")));
            }
            namespaces.push(NamespaceEntry { kind, join_path: ns.path().clone() });
        }

        let root = spec
            .root()
            .as_ref()
            .ok_or_else(|| Error::config("spec is missing `root`"))?;

        let mut mounts = Vec::new();
        for m in spec.mounts().clone().unwrap_or_default() {
            mounts.push(MountEntry::from_spec(&m)?);
        }

        let hooks = spec.hooks().clone().map(|h| HookSet {
            prestart: h.prestart().clone().unwrap_or_default(),
            create_runtime: h.create_runtime().clone().unwrap_or_default(),
            create_container: h.create_container().clone().unwrap_or_default(),
            start_container: h.start_container().clone().unwrap_or_default(),
            poststart: h.poststart().clone().unwrap_or_default(),
            poststop: h.poststop().clone().unwrap_or_default(),
        }).unwrap_or_default();

        Ok(RuntimeConfig {
            process: ProcessConfig {
                args: process.args().clone().unwrap_or_default(),
                env,
                cwd,
                uid: user.uid(),
                gid: user.gid(),
                additional_gids: user.additional_gids().clone().unwrap_or_default(),
                terminal: process.terminal().unwrap_or(false),
                console_size: process
                    .console_size()
                    .as_ref()
                    .map(|c| (c.width(), c.height())),
                rlimits: process.rlimits().clone().unwrap_or_default(),
                capabilities: process.capabilities().clone(),
                no_new_privileges: process.no_new_privileges().unwrap_or(false),
            },
            root: RootConfig {
                path: bundle.join(root.path()),
                readonly: root.readonly().unwrap_or(false),
            },
            mounts,
            namespaces,
            uid_mappings: linux
                .uid_mappings()
                .clone()
                .unwrap_or_default()
                .iter()
                .map(IdMapping::from)
                .collect(),
            gid_mappings: linux
                .gid_mappings()
                .clone()
                .unwrap_or_default()
                .iter()
                .map(IdMapping::from)
                .collect(),
            hooks,
            masked_paths: linux
                .masked_paths()
                .clone()
                .unwrap_or_default()
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            readonly_paths: linux
                .readonly_paths()
                .clone()
                .unwrap_or_default()
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            rootfs_propagation: RootfsPropagation::parse(linux.rootfs_propagation().as_deref())?,
            annotations: spec.annotations().clone().unwrap_or_default(),
            oci_version: spec.version().clone(),
            device_cgroup_rules: linux
                .resources()
                .as_ref()
                .and_then(|r| r.devices().clone())
                .unwrap_or_default(),
        })
    }

    pub fn load(container_dir: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(container_dir.join("config.json"))?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, container_dir: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(container_dir.join("config.json"), data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_spec::runtime::{
        ProcessBuilder, RootBuilder, SpecBuilder, UserBuilder,
    };

    fn minimal_spec() -> Spec {
        SpecBuilder::default()
            .process(
                ProcessBuilder::default()
                    .args(vec!["/bin/true".to_string()])
                    .cwd("/")
                    .user(UserBuilder::default().uid(0u32).gid(0u32).build().unwrap())
                    .build()
                    .unwrap(),
            )
            .root(RootBuilder::default().path("rootfs").build().unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn rejects_duplicate_env_keys() {
        let mut spec = minimal_spec();
        let mut process = spec.process().clone().unwrap();
        process.set_env(Some(vec!["A=1".to_string(), "A=2".to_string()]));
        spec.set_process(Some(process));
        let err = RuntimeConfig::from_spec(&spec, Path::new("/bundle")).unwrap_err();
        assert_eq!(err.kind(), box_core::ErrorKind::Config);
    }

    #[test]
    fn rejects_relative_cwd() {
        let mut spec = minimal_spec();
        let mut process = spec.process().clone().unwrap();
        process.set_cwd(PathBuf::from("relative"));
        spec.set_process(Some(process));
        assert!(RuntimeConfig::from_spec(&spec, Path::new("/bundle")).is_err());
    }

    #[test]
    fn accepts_minimal_spec() {
        let spec = minimal_spec();
        let cfg = RuntimeConfig::from_spec(&spec, Path::new("/bundle")).unwrap();
        assert_eq!(cfg.process.args, vec!["/bin/true".to_string()]);
        assert_eq!(cfg.root.path, Path::new("/bundle/rootfs"));
    }
}
