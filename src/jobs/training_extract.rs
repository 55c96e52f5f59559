//! Nightly BPR training-pair extraction.
//!
//! Extracts `(user_id, pos_item, neg_item, timestamp)` quadruples from
//! behavioral signals into a columnar file for Bayesian Personalized Ranking
//! model training. No Parquet/Arrow crate is available here, so the file is
//! written as CSV with an equivalent schema (see DESIGN.md).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rand::seq::SliceRandom;
use rusqlite::params;
use serde::Serialize;
use uuid::Uuid;

use crate::db::Db;
use crate::jobs::audit::resolve_target_date;

const POSITIVE_SIGNAL_TYPES: &[&str] = &["slot_confirm", "slot_complete", "post_loved", "discover_shortlist"];
const NEGATIVE_SIGNAL_TYPES: &[&str] = &["slot_skip", "post_disliked", "discover_swipe_left"];
const MIN_COMPLETED_TRIPS: i64 = 3;

struct RawSignal {
    user_id: String,
    activity_node_id: String,
    signal_type: String,
    ts: i64,
}

struct BprPair {
    user_id: String,
    pos_item: String,
    neg_item: String,
    timestamp: i64,
}

fn build_bpr_pairs(signals: &[RawSignal]) -> Vec<BprPair> {
    let mut positives: HashMap<&str, Vec<&RawSignal>> = HashMap::new();
    let mut negatives: HashMap<&str, Vec<&RawSignal>> = HashMap::new();

    for sig in signals {
        if POSITIVE_SIGNAL_TYPES.contains(&sig.signal_type.as_str()) {
            positives.entry(sig.user_id.as_str()).or_default().push(sig);
        } else if NEGATIVE_SIGNAL_TYPES.contains(&sig.signal_type.as_str()) {
            negatives.entry(sig.user_id.as_str()).or_default().push(sig);
        }
    }

    let mut rng = rand::thread_rng();
    let mut pairs = Vec::new();
    for (user_id, pos_signals) in &positives {
        let Some(neg_signals) = negatives.get(user_id) else {
            continue;
        };
        for pos in pos_signals {
            let Some(neg) = neg_signals.choose(&mut rng) else {
                continue;
            };
            pairs.push(BprPair {
                user_id: user_id.to_string(),
                pos_item: pos.activity_node_id.clone(),
                neg_item: neg.activity_node_id.clone(),
                timestamp: pos.ts,
            });
        }
    }
    pairs
}

fn output_file_path(output_dir: &str, target_date: NaiveDate) -> PathBuf {
    PathBuf::from(output_dir).join(format!("bpr_training_{target_date}.csv"))
}

fn write_csv(pairs: &[BprPair], file_path: &std::path::Path) -> Result<()> {
    if let Some(parent) = file_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(file_path)?;
    writer.write_record(["user_id", "pos_item", "neg_item", "timestamp"])?;
    for pair in pairs {
        writer.write_record([
            pair.user_id.as_str(),
            pair.pos_item.as_str(),
            pair.neg_item.as_str(),
            &pair.timestamp.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ExtractionResult {
    pub target_date: String,
    pub status: &'static str,
    pub rows_extracted: i64,
    pub file_path: Option<String>,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

pub fn extract_training_data(db: &Db, output_dir: &str, target_date: Option<NaiveDate>) -> Result<ExtractionResult> {
    let run_id = Uuid::new_v4().to_string();
    let target_date = resolve_target_date(target_date);
    let start = Instant::now();
    let file_path = output_file_path(output_dir, target_date);

    if file_path.exists() {
        let duration_ms = start.elapsed().as_millis() as i64;
        tracing::info!(date = %target_date, path = %file_path.display(), "training_extract: already exists, skipping");
        log_audit(db, &run_id, target_date, "skipped", 0, Some(&file_path), duration_ms, None)?;
        return Ok(ExtractionResult {
            target_date: target_date.to_string(),
            status: "skipped",
            rows_extracted: 0,
            file_path: Some(file_path.display().to_string()),
            duration_ms,
            error_message: None,
        });
    }

    let outcome: Result<ExtractionResult> = (|| {
        let eligible_user_ids: Vec<String> = db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"SELECT user_id FROM trips WHERE status = 'completed' GROUP BY user_id HAVING COUNT(*) >= ?1"#,
            )?;
            let rows = stmt.query_map(params![MIN_COMPLETED_TRIPS], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;

        if eligible_user_ids.is_empty() {
            let duration_ms = start.elapsed().as_millis() as i64;
            tracing::warn!(min_trips = MIN_COMPLETED_TRIPS, "training_extract: no eligible users");
            log_audit(db, &run_id, target_date, "success", 0, None, duration_ms, None)?;
            return Ok(ExtractionResult {
                target_date: target_date.to_string(),
                status: "success",
                rows_extracted: 0,
                file_path: None,
                duration_ms,
                error_message: None,
            });
        }

        let day_start = target_date.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let day_end = day_start + chrono::Duration::days(1);
        let all_types: Vec<&str> = POSITIVE_SIGNAL_TYPES.iter().chain(NEGATIVE_SIGNAL_TYPES).copied().collect();

        let signals: Vec<RawSignal> = db.with_conn(|conn| {
            let placeholders = eligible_user_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let type_placeholders = all_types.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                r#"SELECT user_id, activity_node_id, signal_type, CAST(strftime('%s', created_at) AS INTEGER) AS ts
                   FROM behavioral_signals
                   WHERE source = 'user_behavioral' AND activity_node_id IS NOT NULL
                     AND created_at >= ? AND created_at < ?
                     AND user_id IN ({placeholders})
                     AND signal_type IN ({type_placeholders})
                   ORDER BY user_id, created_at"#
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut bound: Vec<&dyn rusqlite::ToSql> = Vec::new();
            let day_start_s = day_start.to_rfc3339();
            let day_end_s = day_end.to_rfc3339();
            bound.push(&day_start_s);
            bound.push(&day_end_s);
            for uid in &eligible_user_ids {
                bound.push(uid);
            }
            for t in &all_types {
                bound.push(t);
            }
            let rows = stmt.query_map(bound.as_slice(), |row| {
                Ok(RawSignal {
                    user_id: row.get(0)?,
                    activity_node_id: row.get(1)?,
                    signal_type: row.get(2)?,
                    ts: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;

        let pairs = build_bpr_pairs(&signals);
        if pairs.is_empty() {
            let duration_ms = start.elapsed().as_millis() as i64;
            tracing::info!(date = %target_date, signals = signals.len(), "training_extract: no BPR pairs generated");
            log_audit(db, &run_id, target_date, "success", 0, None, duration_ms, None)?;
            return Ok(ExtractionResult {
                target_date: target_date.to_string(),
                status: "success",
                rows_extracted: 0,
                file_path: None,
                duration_ms,
                error_message: None,
            });
        }

        write_csv(&pairs, &file_path)?;
        let duration_ms = start.elapsed().as_millis() as i64;
        tracing::info!(date = %target_date, pairs = pairs.len(), duration_ms, "training_extract: complete");
        log_audit(db, &run_id, target_date, "success", pairs.len() as i64, Some(&file_path), duration_ms, None)?;
        Ok(ExtractionResult {
            target_date: target_date.to_string(),
            status: "success",
            rows_extracted: pairs.len() as i64,
            file_path: Some(file_path.display().to_string()),
            duration_ms,
            error_message: None,
        })
    })();

    match outcome {
        Ok(result) => Ok(result),
        Err(err) => {
            let duration_ms = start.elapsed().as_millis() as i64;
            tracing::error!(date = %target_date, error = %err, "training_extract: failed");
            let _ = log_audit(db, &run_id, target_date, "error", 0, None, duration_ms, Some(&err.to_string()));
            Ok(ExtractionResult {
                target_date: target_date.to_string(),
                status: "error",
                rows_extracted: 0,
                file_path: None,
                duration_ms,
                error_message: Some(err.to_string()),
            })
        }
    }
}

fn log_audit(
    db: &Db,
    run_id: &str,
    target_date: NaiveDate,
    status: &str,
    rows: i64,
    file_path: Option<&std::path::Path>,
    duration_ms: i64,
    error_msg: Option<&str>,
) -> Result<()> {
    db.with_conn(|conn| {
        conn.execute(
            r#"INSERT INTO training_extract_runs (id, target_date, status, rows_extracted, file_path, duration_ms, error_message, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                run_id,
                target_date.to_string(),
                status,
                rows,
                file_path.map(|p| p.display().to_string()),
                duration_ms,
                error_msg,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_are_skipped_for_users_without_both_polarities() {
        let signals = vec![RawSignal {
            user_id: "u1".into(),
            activity_node_id: "n1".into(),
            signal_type: "slot_confirm".into(),
            ts: 1000,
        }];
        assert!(build_bpr_pairs(&signals).is_empty());
    }

    #[test]
    fn pairs_pick_a_negative_for_the_same_user() {
        let signals = vec![
            RawSignal {
                user_id: "u1".into(),
                activity_node_id: "pos-node".into(),
                signal_type: "slot_confirm".into(),
                ts: 1000,
            },
            RawSignal {
                user_id: "u1".into(),
                activity_node_id: "neg-node".into(),
                signal_type: "slot_skip".into(),
                ts: 900,
            },
        ];
        let pairs = build_bpr_pairs(&signals);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].pos_item, "pos-node");
        assert_eq!(pairs[0].neg_item, "neg-node");
        assert_eq!(pairs[0].timestamp, 1000);
    }
}
