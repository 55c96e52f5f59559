//! Proximity-based micro-stop suggestions for transit windows.

pub mod service;
pub mod spatial;

pub use service::{MicroStopInsertion, MicroStopResult, MicroStopService};
pub use spatial::{find_nodes_along_path, SpatialCandidate};
