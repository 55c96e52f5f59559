//! Shared idempotency guard for the nightly batch jobs.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};

/// `target_date` defaults to yesterday in UTC when unset.
pub fn resolve_target_date(target_date: Option<NaiveDate>) -> NaiveDate {
    target_date.unwrap_or_else(|| (Utc::now() - chrono::Duration::days(1)).date_naive())
}

/// True if a row with `status='success'` already exists for `run_date` in
/// `table`. All three audit tables share this (run_date, status) shape.
pub fn already_succeeded(conn: &Connection, table: &str, run_date: NaiveDate) -> Result<bool> {
    let sql = format!("SELECT 1 FROM {table} WHERE run_date = ?1 AND status = 'success' LIMIT 1");
    let exists = conn
        .query_row(&sql, [run_date.to_string()], |_| Ok(()))
        .optional()?;
    Ok(exists.is_some())
}
