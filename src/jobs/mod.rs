//! Nightly batch jobs: behavioral write-back, persona EMA update, and BPR
//! training-pair extraction. All three share idempotency-by-`run_date` and
//! single-transaction atomicity (see `audit`).

pub mod audit;
pub mod persona_ema;
pub mod training_extract;
pub mod write_back;

pub use persona_ema::run_persona_update;
pub use training_extract::extract_training_data;
pub use write_back::run_write_back;
