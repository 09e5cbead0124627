//! File-descriptor vocabulary and sync-channel primitives shared by the
//! rest of the `linyaps-box` workspace (spec §4.A, §4.B).

pub mod error;
pub mod fd;
pub mod sync;

pub use error::ErrorKind;
pub use fd::Fd;
pub use sync::{SyncError, SyncMessage, SyncSocket};
