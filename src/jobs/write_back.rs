//! Nightly behavioral write-back: folds the day's signals into each
//! `ActivityNode`'s cumulative impression/acceptance counters and recomputes
//! the Laplace-smoothed `behavioral_quality_score`.

use std::collections::HashMap;
use std::time::Instant;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::db::Db;
use crate::jobs::audit::{already_succeeded, resolve_target_date};

const IMPRESSION_TYPES: &[&str] = &[
    "slot_view",
    "slot_tap",
    "slot_confirm",
    "slot_complete",
    "discover_swipe_right",
    "discover_shortlist",
];

const ACCEPTANCE_TYPES: &[&str] = &["slot_confirm", "slot_complete", "discover_shortlist", "post_loved"];

#[derive(Debug, Serialize)]
pub struct WriteBackResult {
    pub date: String,
    pub status: &'static str,
    pub rows_updated: i64,
    pub duration_ms: i64,
}

pub fn run_write_back(db: &Db, target_date: Option<NaiveDate>) -> Result<WriteBackResult> {
    let target_date = resolve_target_date(target_date);
    let date_label = target_date.to_string();
    let start = Instant::now();

    let skip = db.with_conn(|conn| already_succeeded(conn, "write_back_runs", target_date))?;
    if skip {
        tracing::info!(date = %date_label, "write_back: already succeeded, skipping");
        return Ok(WriteBackResult {
            date: date_label,
            status: "skipped",
            rows_updated: 0,
            duration_ms: start.elapsed().as_millis() as i64,
        });
    }

    let day_start = target_date.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let day_end = day_start + chrono::Duration::days(1);

    let outcome = db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;

        let mut agg: HashMap<String, (i64, i64)> = HashMap::new();
        {
            let mut stmt = tx.prepare(
                r#"SELECT activity_node_id, signal_type FROM behavioral_signals
                   WHERE activity_node_id IS NOT NULL AND source = 'user_behavioral'
                     AND created_at >= ?1 AND created_at < ?2"#,
            )?;
            let rows = stmt.query_map(params![day_start.to_rfc3339(), day_end.to_rfc3339()], |row| {
                let node_id: String = row.get(0)?;
                let signal_type: String = row.get(1)?;
                Ok((node_id, signal_type))
            })?;
            for row in rows {
                let (node_id, signal_type) = row?;
                let entry = agg.entry(node_id).or_insert((0, 0));
                if IMPRESSION_TYPES.contains(&signal_type.as_str()) {
                    entry.0 += 1;
                }
                if ACCEPTANCE_TYPES.contains(&signal_type.as_str()) {
                    entry.1 += 1;
                }
            }
        }

        let mut rows_updated = 0i64;
        for (node_id, (impressions_delta, acceptance_delta)) in &agg {
            let updated = tx.execute(
                r#"UPDATE activity_nodes
                   SET impression_count = impression_count + ?2,
                       acceptance_count = acceptance_count + ?3,
                       behavioral_quality_score =
                           CAST(acceptance_count + ?3 + 1.0 AS REAL) /
                           CAST(impression_count + ?2 + 2.0 AS REAL)
                   WHERE id = ?1"#,
                params![node_id, impressions_delta, acceptance_delta],
            )?;
            rows_updated += updated as i64;
        }

        let duration_ms = start.elapsed().as_millis() as i64;
        tx.execute(
            r#"INSERT INTO write_back_runs (run_date, status, rows_updated, duration_ms, created_at)
               VALUES (?1, 'success', ?2, ?3, ?4)"#,
            params![target_date.to_string(), rows_updated, duration_ms, Utc::now().to_rfc3339()],
        )?;

        tx.commit()?;
        Ok(rows_updated)
    });

    let rows_updated = match outcome {
        Ok(rows) => rows,
        Err(err) => {
            let duration_ms = start.elapsed().as_millis() as i64;
            tracing::error!(date = %date_label, error = %err, "write_back: failed");
            let _ = db.with_conn(|conn| {
                conn.execute(
                    r#"INSERT INTO write_back_runs (run_date, status, rows_updated, duration_ms, error_message, created_at)
                       VALUES (?1, 'error', 0, ?2, ?3, ?4)"#,
                    params![target_date.to_string(), duration_ms, err.to_string(), Utc::now().to_rfc3339()],
                )
            });
            return Err(err);
        }
    };

    let duration_ms = start.elapsed().as_millis() as i64;
    tracing::info!(date = %date_label, rows_updated, duration_ms, "write_back: complete");
    Ok(WriteBackResult {
        date: date_label,
        status: "success",
        rows_updated,
        duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params as rparams;

    fn seed_node(db: &Db, id: &str) {
        db.with_conn(|conn| {
            conn.execute(
                r#"INSERT INTO activity_nodes (id, name, category, lat, lon) VALUES (?1, 'x', 'dining', 0, 0)"#,
                rparams![id],
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn seed_signal(db: &Db, node_id: &str, signal_type: &str, created_at: chrono::DateTime<Utc>) {
        db.with_conn(|conn| {
            conn.execute(
                r#"INSERT INTO behavioral_signals (
                       id, user_id, trip_id, activity_node_id, signal_type, signal_value,
                       trip_phase, raw_action, source, signal_weight, created_at
                   ) VALUES (?1, 'u1', 't1', ?2, ?3, 1.0, 'active', 'x', 'user_behavioral', 0.3, ?4)"#,
                rparams![uuid::Uuid::new_v4().to_string(), node_id, signal_type, created_at.to_rfc3339()],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn happy_path_computes_laplace_smoothed_score() {
        let db = Db::open_in_memory().unwrap();
        seed_node(&db, "node-x");
        let date = NaiveDate::from_ymd_opt(2026, 2, 22).unwrap();
        let ts = date.and_hms_opt(10, 0, 0).unwrap().and_utc();
        for _ in 0..5 {
            seed_signal(&db, "node-x", "slot_confirm", ts);
        }
        for _ in 0..3 {
            seed_signal(&db, "node-x", "slot_view", ts);
        }

        let result = run_write_back(&db, Some(date)).unwrap();
        assert_eq!(result.status, "success");
        assert_eq!(result.rows_updated, 1);

        let score: f64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT behavioral_quality_score FROM activity_nodes WHERE id = 'node-x'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert!((score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn rerun_same_date_is_skipped() {
        let db = Db::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 2, 22).unwrap();
        run_write_back(&db, Some(date)).unwrap();
        let second = run_write_back(&db, Some(date)).unwrap();
        assert_eq!(second.status, "skipped");
        assert_eq!(second.rows_updated, 0);
    }
}
