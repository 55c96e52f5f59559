//! Post-ranking passes applied after persona fit, before slot assignment.

pub mod cant_miss;

pub use cant_miss::{apply_cant_miss_floor, set_cant_miss, RankedCandidate};
