//! Pivot swaps: downstream cascade re-solving and micro-stop insertion.

pub mod cascade;
pub mod microstops;

pub use cascade::{apply_cascade, check_cross_day_impact, evaluate_cascade, CascadeResult, CascadeSummary, SlotSnapshot};
pub use microstops::{MicroStopInsertion, MicroStopResult, MicroStopService};
