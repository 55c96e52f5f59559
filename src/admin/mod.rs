//! Admin-surface request verification.

pub mod hmac;

pub use hmac::{verify_admin_hmac, AdminHmacError, AdminHmacRequest};
