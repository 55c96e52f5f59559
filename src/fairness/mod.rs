//! Group fairness debt tracking and Abilene-paradox detection for group trips.

pub mod abilene;
pub mod engine;

pub use abilene::{AbileneDetector, AbileneResult};
pub use engine::{FairnessEngine, FairnessState, MemberDebt};
