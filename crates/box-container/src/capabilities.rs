//! Capability-set application for the container init process only (spec
//! non-goals: no general seccomp/capability policy engine). Grounded on
//! `libcontainer::capabilities::reset_effective`/`drop_privileges`, narrowed
//! to the one use the orchestrator needs: dropping to the configured sets
//! right before `execvpe`.

use std::collections::HashSet;

use caps::{CapSet, CapsHashSet};
use oci_spec::runtime::{Capability, LinuxCapabilities};

use crate::error::Result;

fn to_capsset(names: Option<&Vec<String>>) -> CapsHashSet {
    names
        .map(|list| {
            list.iter()
                .filter_map(|n| n.trim_start_matches("CAP_").parse::<caps::Capability>().ok())
                .collect()
        })
        .unwrap_or_default()
}

fn names_of(caps: Option<&HashSet<Capability>>) -> Option<Vec<String>> {
    caps.map(|set| set.iter().map(|c| c.to_string()).collect())
}

/// Applies the five standard capability sets (bounding, effective,
/// permitted, inheritable, ambient) to the current (about-to-exec) process,
/// matching the order the teacher applies them: bounding is pruned first so
/// later sets can only narrow, never widen, the process's capability space.
pub fn apply(caps_config: &LinuxCapabilities) -> Result<()> {
    set(CapSet::Bounding, to_capsset(names_of(caps_config.bounding().as_ref()).as_ref()))?;
    set(CapSet::Permitted, to_capsset(names_of(caps_config.permitted().as_ref()).as_ref()))?;
    set(CapSet::Effective, to_capsset(names_of(caps_config.effective().as_ref()).as_ref()))?;
    set(CapSet::Inheritable, to_capsset(names_of(caps_config.inheritable().as_ref()).as_ref()))?;
    set(CapSet::Ambient, to_capsset(names_of(caps_config.ambient().as_ref()).as_ref()))?;
    Ok(())
}

fn set(set: CapSet, target: CapsHashSet) -> Result<()> {
    caps::set(None, set, &target).map_err(|e| crate::error::Error::config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_capability_names_are_ignored_not_fatal() {
        let names = vec!["CAP_CHOWN".to_string(), "CAP_NOT_A_REAL_CAP".to_string()];
        let parsed = to_capsset(Some(&names));
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn empty_list_yields_empty_set() {
        assert!(to_capsset(None).is_empty());
    }
}
