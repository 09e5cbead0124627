//! Mount option vocabulary: parses the OCI `options` string list into the
//! `(flags, propagation_flags, extension_flags, data)` tuple spec §3/§6
//! describes for a `Mount entry`, and re-serializes it canonically.
//!
//! Testable property 1 (spec §8): parsing a set of options and
//! re-serializing to canonical form yields the same effective tuple,
//! independent of input order. `bitflags` keeps flags/propagation/extension
//! as three disjoint sets rather than lumping everything into one `MsFlags`
//! the way the teacher's `rootfs::utils::parse_mount` does, because this
//! spec treats propagation and the `copy-symlink` extension as separate
//! fields of the mount entry (spec §3).

use nix::mount::MsFlags;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PropagationFlags: u32 {
        const SHARED      = 0b0000_0001;
        const RSHARED     = 0b0000_0010;
        const SLAVE       = 0b0000_0100;
        const RSLAVE      = 0b0000_1000;
        const PRIVATE     = 0b0001_0000;
        const RPRIVATE    = 0b0010_0000;
        const UNBINDABLE  = 0b0100_0000;
        const RUNBINDABLE = 0b1000_0000;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExtensionFlags: u32 {
        /// When the bind-mount source is a symlink, copy the link target
        /// into the destination instead of bind-mounting through it.
        const COPY_SYMLINK = 0b0000_0001;
    }
}

// Bits not yet named in every `nix` release, kept as raw kernel ABI values
// (linux/fs.h) rather than depending on a specific `nix` version exposing
// them under these names.
const MS_NOSYMFOLLOW: u64 = 0x100;
const MS_I_VERSION: u64 = 1 << 23;
const MS_LAZYTIME: u64 = 1 << 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMount {
    pub flags: MsFlags,
    pub propagation: PropagationFlags,
    pub extension: ExtensionFlags,
    pub data: String,
}

impl Default for ParsedMount {
    fn default() -> Self {
        ParsedMount {
            flags: MsFlags::empty(),
            propagation: PropagationFlags::empty(),
            extension: ExtensionFlags::empty(),
            data: String::new(),
        }
    }
}

/// Parses the OCI `options` vocabulary from spec §6. Unknown options are
/// passed through verbatim into `data` (filesystem-specific options, e.g.
/// `mode=0755`), matching spec §3's "`data` (comma-joined non-flag
/// options)".
pub fn parse(options: &[String]) -> ParsedMount {
    let mut flags = MsFlags::empty();
    let mut propagation = PropagationFlags::empty();
    let mut extension = ExtensionFlags::empty();
    let mut data = Vec::new();

    for opt in options {
        if let Some(flag) = flag_for(opt) {
            match flag {
                FlagEffect::Set(f) => flags |= f,
                FlagEffect::Clear(f) => flags &= !f,
            }
            continue;
        }
        if let Some(p) = propagation_for(opt) {
            propagation |= p;
            continue;
        }
        if opt == "copy-symlink" {
            extension |= ExtensionFlags::COPY_SYMLINK;
            continue;
        }
        data.push(opt.clone());
    }

    ParsedMount {
        flags,
        propagation,
        extension,
        data: data.join(","),
    }
}

enum FlagEffect {
    Set(MsFlags),
    Clear(MsFlags),
}

fn flag_for(opt: &str) -> Option<FlagEffect> {
    use FlagEffect::*;
    Some(match opt {
        "ro" => Set(MsFlags::MS_RDONLY),
        "rw" => Clear(MsFlags::MS_RDONLY),
        "nosuid" => Set(MsFlags::MS_NOSUID),
        "suid" => Clear(MsFlags::MS_NOSUID),
        "nodev" => Set(MsFlags::MS_NODEV),
        "dev" => Clear(MsFlags::MS_NODEV),
        "noexec" => Set(MsFlags::MS_NOEXEC),
        "exec" => Clear(MsFlags::MS_NOEXEC),
        "sync" => Set(MsFlags::MS_SYNCHRONOUS),
        "async" => Clear(MsFlags::MS_SYNCHRONOUS),
        "remount" => Set(MsFlags::MS_REMOUNT),
        "mand" => Set(MsFlags::MS_MANDLOCK),
        "nomand" => Clear(MsFlags::MS_MANDLOCK),
        "dirsync" => Set(MsFlags::MS_DIRSYNC),
        "atime" => Clear(MsFlags::MS_NOATIME),
        "noatime" => Set(MsFlags::MS_NOATIME),
        "diratime" => Clear(MsFlags::MS_NODIRATIME),
        "nodiratime" => Set(MsFlags::MS_NODIRATIME),
        "relatime" => Set(MsFlags::MS_RELATIME),
        "norelatime" => Clear(MsFlags::MS_RELATIME),
        "strictatime" => Set(MsFlags::MS_STRICTATIME),
        "nostrictatime" => Clear(MsFlags::MS_STRICTATIME),
        "bind" => Set(MsFlags::MS_BIND),
        "rbind" => Set(MsFlags::MS_BIND | MsFlags::MS_REC),
        "silent" => Set(MsFlags::MS_SILENT),
        "loud" => Clear(MsFlags::MS_SILENT),
        "iversion" => Set(MsFlags::from_bits_retain(MS_I_VERSION)),
        "noiversion" => Clear(MsFlags::from_bits_retain(MS_I_VERSION)),
        "lazytime" => Set(MsFlags::from_bits_retain(MS_LAZYTIME)),
        "nolazytime" => Clear(MsFlags::from_bits_retain(MS_LAZYTIME)),
        "nosymfollow" => Set(MsFlags::from_bits_retain(MS_NOSYMFOLLOW)),
        "symfollow" => Clear(MsFlags::from_bits_retain(MS_NOSYMFOLLOW)),
        _ => return None,
    })
}

fn propagation_for(opt: &str) -> Option<PropagationFlags> {
    Some(match opt {
        "shared" => PropagationFlags::SHARED,
        "rshared" => PropagationFlags::RSHARED,
        "slave" => PropagationFlags::SLAVE,
        "rslave" => PropagationFlags::RSLAVE,
        "private" => PropagationFlags::PRIVATE,
        "rprivate" => PropagationFlags::RPRIVATE,
        "unbindable" => PropagationFlags::UNBINDABLE,
        "runbindable" => PropagationFlags::RUNBINDABLE,
        _ => return None,
    })
}

/// Converts parsed propagation flags into the `MsFlags` the kernel expects
/// for the dedicated propagation-change `mount(2)` call (spec §4.C step 3).
pub fn propagation_to_ms_flags(p: PropagationFlags) -> MsFlags {
    let mut flags = MsFlags::empty();
    if p.contains(PropagationFlags::SHARED) {
        flags |= MsFlags::MS_SHARED;
    }
    if p.contains(PropagationFlags::RSHARED) {
        flags |= MsFlags::MS_SHARED | MsFlags::MS_REC;
    }
    if p.contains(PropagationFlags::SLAVE) {
        flags |= MsFlags::MS_SLAVE;
    }
    if p.contains(PropagationFlags::RSLAVE) {
        flags |= MsFlags::MS_SLAVE | MsFlags::MS_REC;
    }
    if p.contains(PropagationFlags::PRIVATE) {
        flags |= MsFlags::MS_PRIVATE;
    }
    if p.contains(PropagationFlags::RPRIVATE) {
        flags |= MsFlags::MS_PRIVATE | MsFlags::MS_REC;
    }
    if p.contains(PropagationFlags::UNBINDABLE) {
        flags |= MsFlags::MS_UNBINDABLE;
    }
    if p.contains(PropagationFlags::RUNBINDABLE) {
        flags |= MsFlags::MS_UNBINDABLE | MsFlags::MS_REC;
    }
    flags
}

/// Canonical re-serialization, used only by the round-trip test: the
/// effective option set in a fixed, option-name order.
pub fn to_canonical_options(p: &ParsedMount) -> Vec<String> {
    let mut out = Vec::new();
    macro_rules! push_if {
        ($cond:expr, $name:literal) => {
            if $cond {
                out.push($name.to_string());
            }
        };
    }
    push_if!(p.flags.contains(MsFlags::MS_RDONLY), "ro");
    push_if!(p.flags.contains(MsFlags::MS_NOSUID), "nosuid");
    push_if!(p.flags.contains(MsFlags::MS_NODEV), "nodev");
    push_if!(p.flags.contains(MsFlags::MS_NOEXEC), "noexec");
    push_if!(p.flags.contains(MsFlags::MS_BIND | MsFlags::MS_REC), "rbind");
    push_if!(
        p.flags.contains(MsFlags::MS_BIND) && !p.flags.contains(MsFlags::MS_REC),
        "bind"
    );
    if p.propagation.contains(PropagationFlags::RSHARED) {
        out.push("rshared".to_string());
    } else if p.propagation.contains(PropagationFlags::SHARED) {
        out.push("shared".to_string());
    }
    if p.propagation.contains(PropagationFlags::RSLAVE) {
        out.push("rslave".to_string());
    } else if p.propagation.contains(PropagationFlags::SLAVE) {
        out.push("slave".to_string());
    }
    if p.propagation.contains(PropagationFlags::RPRIVATE) {
        out.push("rprivate".to_string());
    } else if p.propagation.contains(PropagationFlags::PRIVATE) {
        out.push("private".to_string());
    }
    if p.propagation.contains(PropagationFlags::RUNBINDABLE) {
        out.push("runbindable".to_string());
    } else if p.propagation.contains(PropagationFlags::UNBINDABLE) {
        out.push("unbindable".to_string());
    }
    push_if!(p.extension.contains(ExtensionFlags::COPY_SYMLINK), "copy-symlink");
    if !p.data.is_empty() {
        out.extend(p.data.split(',').map(str::to_string));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    const VOCAB: &[&str] = &[
        "bind", "rbind", "ro", "rw", "nosuid", "suid", "nodev", "dev", "noexec", "exec", "sync",
        "async", "remount", "relatime", "norelatime", "noatime", "atime", "nodiratime", "diratime",
        "dirsync", "mand", "nomand", "iversion", "noiversion", "lazytime", "nolazytime", "silent",
        "loud", "strictatime", "nostrictatime", "nosymfollow", "symfollow", "rshared", "shared",
        "rslave", "slave", "rprivate", "private", "runbindable", "unbindable", "copy-symlink",
    ];

    fn subset_from_bits(bits: u64) -> Vec<String> {
        VOCAB
            .iter()
            .enumerate()
            .filter(|(i, _)| bits & (1 << i) != 0)
            .map(|(_, s)| s.to_string())
            .collect()
    }

    quickcheck! {
        fn round_trip_independent_of_order(bits: u64, seed: u8) -> bool {
            let mut opts = subset_from_bits(bits);
            let parsed_a = parse(&opts);
            // deterministic shuffle keyed on seed, no external RNG crate needed
            if !opts.is_empty() {
                let n = opts.len();
                for i in 0..n {
                    let j = (usize::from(seed) + i * 7) % n;
                    opts.swap(i, j);
                }
            }
            let parsed_b = parse(&opts);
            parsed_a == parsed_b
        }
    }

    #[test]
    fn bind_and_ro_compose() {
        let p = parse(&["bind".into(), "ro".into()]);
        assert!(p.flags.contains(MsFlags::MS_BIND));
        assert!(p.flags.contains(MsFlags::MS_RDONLY));
        assert!(p.data.is_empty());
    }

    #[test]
    fn unknown_options_become_data() {
        let p = parse(&["nosuid".into(), "mode=0755".into(), "size=64k".into()]);
        assert!(p.flags.contains(MsFlags::MS_NOSUID));
        assert_eq!(p.data, "mode=0755,size=64k");
    }

    #[test]
    fn propagation_is_tracked_separately_from_flags() {
        let p = parse(&["rprivate".into()]);
        assert!(p.flags.is_empty());
        assert!(p.propagation.contains(PropagationFlags::RPRIVATE));
        assert_eq!(
            propagation_to_ms_flags(p.propagation),
            MsFlags::MS_PRIVATE | MsFlags::MS_REC
        );
    }

    #[test]
    fn copy_symlink_is_an_extension_not_a_flag() {
        let p = parse(&["bind".into(), "copy-symlink".into()]);
        assert!(p.extension.contains(ExtensionFlags::COPY_SYMLINK));
        assert!(p.data.is_empty());
    }
}
