//! The process split: `clone` primitive, container-side init, runtime-side
//! run flow (spec §4.D, §4.H).

pub mod child;
pub mod clone;
pub mod parent;
