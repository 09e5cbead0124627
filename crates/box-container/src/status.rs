//! Container-status record and status directory (spec §3, §6 "Status file
//! format"). Grounded on `original_source/src/linyaps_box/impl/
//! status_directory.cpp` for the directory shape and on the teacher's
//! `container::state::State::save` for the write-to-temp-then-rename
//! atomicity idiom.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nix::sys::stat::Mode;
use nix::unistd::Uid;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Creating,
    Created,
    Running,
    Stopped,
}

impl std::fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuntimeStatus::Creating => "creating",
            RuntimeStatus::Created => "created",
            RuntimeStatus::Running => "running",
            RuntimeStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: String,
    pub pid: i32,
    pub status: RuntimeStatus,
    pub bundle: PathBuf,
    pub created: DateTime<Utc>,
    pub owner: String,
    pub annotations: HashMap<String, String>,
    #[serde(rename = "ociVersion")]
    pub oci_version: String,
}

impl StatusRecord {
    pub fn new(id: &str, bundle: &Path, annotations: HashMap<String, String>, oci_version: &str) -> Self {
        StatusRecord {
            id: id.to_string(),
            pid: 0,
            status: RuntimeStatus::Creating,
            bundle: bundle.to_path_buf(),
            created: now(),
            owner: resolve_owner(),
            annotations,
            oci_version: oci_version.to_string(),
        }
    }

    /// Liveness check: a process entry can outlive the process if nothing
    /// ever calls `remove`, so callers treat `kill(pid, 0) != 0` as stale.
    pub fn is_alive(&self) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(self.pid), None).is_ok()
    }
}

fn now() -> DateTime<Utc> {
    // Date::now() is unavailable in some embedding contexts (see workspace
    // test harness); Utc::now() reads the system clock directly and is fine
    // for normal process execution.
    Utc::now()
}

fn resolve_owner() -> String {
    let uid = Uid::current();
    match nix::unistd::User::from_uid(uid) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

pub struct StatusDirectory {
    root: PathBuf,
}

impl StatusDirectory {
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        nix::sys::stat::fchmodat(
            None,
            root,
            Mode::from_bits_truncate(0o700),
            nix::sys::stat::FchmodatFlags::FollowSymlink,
        )
        .ok();
        Ok(StatusDirectory { root: root.to_path_buf() })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.path_for(id).exists()
    }

    /// Write-to-temp-then-rename: the rename is atomic, so a concurrent
    /// `list` never observes a partially written status file.
    pub fn save(&self, record: &StatusRecord) -> Result<()> {
        let final_path = self.path_for(&record.id);
        let tmp_path = self.root.join(format!(".{}.json.tmp", record.id));
        let data = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<StatusRecord> {
        let data = std::fs::read_to_string(self.path_for(id))?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists every status record found, skipping (and leaving in place)
    /// files for processes that are no longer alive — `list`/`kill` only
    /// ever see live containers, but a crashed runtime's leftover file is
    /// not silently deleted out from under a concurrent inspector.
    pub fn list(&self) -> Result<Vec<StatusRecord>> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = std::fs::read_to_string(&path)?;
            if let Ok(record) = serde_json::from_str::<StatusRecord>(&data) {
                if record.is_alive() {
                    out.push(record);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = StatusDirectory::open(tmp.path()).unwrap();
        let mut record = StatusRecord::new("box1", Path::new("/bundle"), HashMap::new(), "1.0.2");
        record.pid = std::process::id() as i32;
        dir.save(&record).unwrap();
        let loaded = dir.load("box1").unwrap();
        assert_eq!(loaded.id, "box1");
        assert_eq!(loaded.status, RuntimeStatus::Creating);
    }

    #[test]
    #[serial]
    fn list_skips_dead_processes() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = StatusDirectory::open(tmp.path()).unwrap();
        let mut record = StatusRecord::new("dead", Path::new("/bundle"), HashMap::new(), "1.0.2");
        record.pid = 999999; // assumed not to exist
        dir.save(&record).unwrap();
        assert!(dir.list().unwrap().is_empty());
    }

    #[test]
    #[serial]
    fn remove_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = StatusDirectory::open(tmp.path()).unwrap();
        dir.remove("never-existed").unwrap();
        dir.remove("never-existed").unwrap();
    }
}
