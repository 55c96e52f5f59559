//! Off-plan signal handling — records a user-initiated mid-trip activity add
//! that was not part of the pre-generated plan.
//!
//! Matched path (an `activity_node_id` resolved): writes a `SlotConfirmed`
//! signal with weight 1.4 — a strong positive, the user sought this out
//! unprompted. Unmatched path: queues a `CorpusIngestionRequest` for the
//! scrape+embed pipeline to backfill later.

use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db::Db;
use crate::models::{CorpusIngestionRequest, SignalType};

const SIGNAL_WEIGHT_MATCHED: f64 = 1.4;
const SIGNAL_SOURCE_MATCHED: &str = "user_behavioral";
const SIGNAL_SUBFLOW: &str = "onthefly_add";
const INGESTION_SOURCE: &str = "off_plan_add";
const INGESTION_STATUS: &str = "pending";

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
#[allow(clippy::large_enum_variant)]
pub enum OffPlanOutcome {
    #[serde(rename = "signal")]
    Signal {
        id: String,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "tripId")]
        trip_id: String,
        #[serde(rename = "activityNodeId")]
        activity_node_id: String,
        #[serde(rename = "signalType")]
        signal_type: &'static str,
        subflow: &'static str,
        source: &'static str,
        #[serde(rename = "createdAt")]
        created_at: chrono::DateTime<Utc>,
    },
    #[serde(rename = "ingestion_request")]
    IngestionRequest(CorpusIngestionRequest),
    #[serde(rename = "duplicate")]
    Duplicate { message: String },
}

/// Record a user-initiated off-plan activity add. Deduplicates at most one
/// `SlotConfirmed` signal per (user, venue, trip): matched adds dedup on
/// `activity_node_id`, unmatched adds dedup on a normalized place-name key.
pub fn handle_off_plan_add(
    db: &Db,
    user_id: &str,
    trip_id: &str,
    place_name: &str,
    activity_node_id: Option<&str>,
) -> Result<OffPlanOutcome> {
    if user_id.is_empty() {
        bail!("user_id is required");
    }
    if trip_id.is_empty() {
        bail!("trip_id is required");
    }
    let trimmed = place_name.trim();
    if trimmed.is_empty() {
        bail!("place_name is required");
    }

    let normalized_place = trimmed.to_lowercase();
    let raw_action_key = format!("off_plan_add:{normalized_place}");
    let now = Utc::now();

    let signal_type_str = SignalType::SlotConfirmed.as_str();

    let already_exists = db.with_conn(|conn| {
        let exists = conn
            .query_row(
                r#"SELECT 1 FROM behavioral_signals
                   WHERE user_id = ?1 AND trip_id = ?2 AND signal_type = ?3
                     AND (
                           (?4 IS NOT NULL AND activity_node_id = ?4)
                        OR (activity_node_id IS NULL AND raw_action = ?5)
                     )
                   LIMIT 1"#,
                params![user_id, trip_id, signal_type_str, activity_node_id, raw_action_key],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    })?;

    if already_exists {
        return Ok(OffPlanOutcome::Duplicate {
            message: format!("Off-plan add for '{trimmed}' already recorded for this trip."),
        });
    }

    if let Some(node_id) = activity_node_id {
        let id = Uuid::new_v4().to_string();
        db.with_conn(|conn| {
            conn.execute(
                r#"INSERT INTO behavioral_signals (
                       id, user_id, trip_id, activity_node_id,
                       signal_type, signal_value, trip_phase,
                       raw_action, source, subflow, signal_weight, created_at
                   ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
                params![
                    id,
                    user_id,
                    trip_id,
                    node_id,
                    signal_type_str,
                    1.0,
                    "active",
                    raw_action_key,
                    SIGNAL_SOURCE_MATCHED,
                    SIGNAL_SUBFLOW,
                    SIGNAL_WEIGHT_MATCHED,
                    now.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;

        return Ok(OffPlanOutcome::Signal {
            id,
            user_id: user_id.to_string(),
            trip_id: trip_id.to_string(),
            activity_node_id: node_id.to_string(),
            signal_type: signal_type_str,
            subflow: SIGNAL_SUBFLOW,
            source: SIGNAL_SOURCE_MATCHED,
            created_at: now,
        });
    }

    let id = Uuid::new_v4().to_string();
    db.with_conn(|conn| {
        conn.execute(
            r#"INSERT INTO corpus_ingestion_requests (
                   id, raw_place_name, trip_id, user_id, source, status, created_at
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![id, trimmed, trip_id, user_id, INGESTION_SOURCE, INGESTION_STATUS, now.to_rfc3339()],
        )?;
        Ok(())
    })?;

    Ok(OffPlanOutcome::IngestionRequest(CorpusIngestionRequest {
        id,
        raw_place_name: trimmed.to_string(),
        trip_id: trip_id.to_string(),
        user_id: user_id.to_string(),
        source: INGESTION_SOURCE.to_string(),
        status: INGESTION_STATUS.to_string(),
        created_at: now,
    }))
}
