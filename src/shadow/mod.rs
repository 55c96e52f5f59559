//! Shadow mode: runs a candidate ranking model alongside production without
//! ever affecting the request path.

pub mod runner;

pub use runner::{compute_ndcg_at_k, compute_overlap_at_k, ShadowModel, ShadowResult, ShadowRunner};
