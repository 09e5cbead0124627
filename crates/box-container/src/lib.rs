//! Core process-supervisor pipeline for the `linyaps-box` container runtime:
//! components C through H (mount engine, namespace controller, hook
//! scheduler, pivot-root/stdio, supervisor, orchestrator) plus the
//! status-directory and cgroup-manager collaborators. Grounded throughout on
//! `libcontainer`.

pub mod capabilities;
pub mod cgroup;
pub mod config;
pub mod container;
pub mod error;
pub mod hooks;
pub mod mount_options;
pub mod namespaces;
pub mod pivot;
pub mod process;
pub mod rootfs;
pub mod rootless;
pub mod status;
pub mod supervisor;
pub mod tty;

pub use config::RuntimeConfig;
pub use container::Orchestrator;
pub use error::{Error, Result};
