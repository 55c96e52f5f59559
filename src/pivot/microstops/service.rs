//! Orchestrates proximity-based micro-stop suggestions for a trip day.
//!
//! Micro-stops are never auto-confirmed — always inserted as a `proposed`
//! flex slot for the user to accept or skip. At most one suggestion per
//! transit segment, and none at all if a flex slot already follows it.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db::Db;
use crate::models::{BehavioralSignal, SignalType, TripPhase};
use crate::signals::SignalStore;
use super::spatial::{find_nodes_along_path, SpatialCandidate};

struct TransitSegment {
    slot_id: String,
    sort_order: i32,
    end_time: Option<DateTime<Utc>>,
    origin_lat: f64,
    origin_lon: f64,
    destination_lat: f64,
    destination_lon: f64,
    origin_node_id: Option<String>,
    destination_node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MicroStopInsertion {
    pub new_slot_id: String,
    pub activity_node_id: String,
    pub activity_name: String,
    pub inserted_after_slot_id: String,
    pub sort_order: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: i32,
    pub convergence_score: Option<f64>,
}

#[derive(Debug, Default, Serialize)]
pub struct MicroStopResult {
    pub trip_id: String,
    pub day_number: i32,
    pub transit_segments_evaluated: usize,
    pub insertions: Vec<MicroStopInsertion>,
    pub warnings: Vec<String>,
}

impl MicroStopResult {
    pub fn inserted_count(&self) -> usize {
        self.insertions.len()
    }
}

pub struct MicroStopService {
    db: Db,
}

impl MicroStopService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Evaluate every transit slot on `day_number` and propose micro-stops
    /// where a suitable nearby node exists. Never fails on a single bad
    /// segment — failures are collected as warnings on the result.
    pub fn suggest_for_day(&self, trip_id: &str, day_number: i32) -> anyhow::Result<MicroStopResult> {
        let mut result = MicroStopResult {
            trip_id: trip_id.to_string(),
            day_number,
            ..Default::default()
        };

        let segments = self.fetch_transit_segments(trip_id, day_number)?;
        result.transit_segments_evaluated = segments.len();

        if segments.is_empty() {
            result.warnings.push("No eligible transit segments found.".to_string());
            return Ok(result);
        }

        for segment in &segments {
            match self.evaluate_segment(trip_id, day_number, segment) {
                Ok(Some(insertion)) => result.insertions.push(insertion),
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(slot = %segment.slot_id, error = %err, "micro-stop evaluation failed");
                    result.warnings.push(format!("Segment {} failed: {err}", segment.slot_id));
                }
            }
        }

        tracing::info!(
            trip_id,
            day_number,
            segments = result.transit_segments_evaluated,
            inserted = result.inserted_count(),
            "micro-stops evaluated"
        );

        Ok(result)
    }

    fn fetch_transit_segments(&self, trip_id: &str, day_number: i32) -> anyhow::Result<Vec<TransitSegment>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"WITH ranked AS (
                       SELECT id, sort_order, slot_type, start_time, end_time,
                              duration_minutes, is_locked, status,
                              LAG(activity_node_id) OVER (ORDER BY sort_order) AS origin_node_id,
                              LEAD(activity_node_id) OVER (ORDER BY sort_order) AS dest_node_id
                       FROM itinerary_slots
                       WHERE trip_id = ?1 AND day_number = ?2
                   )
                   SELECT r.id, r.sort_order, r.end_time, r.origin_node_id, r.dest_node_id,
                          orig.lat, orig.lon, dest.lat, dest.lon
                   FROM ranked r
                   LEFT JOIN activity_nodes orig ON orig.id = r.origin_node_id
                   LEFT JOIN activity_nodes dest ON dest.id = r.dest_node_id
                   WHERE r.slot_type = 'transit'
                     AND r.is_locked = 0
                     AND r.status NOT IN ('completed', 'skipped')
                     AND orig.lat IS NOT NULL AND orig.lon IS NOT NULL
                     AND dest.lat IS NOT NULL AND dest.lon IS NOT NULL
                   ORDER BY r.sort_order ASC"#,
            )?;
            let rows = stmt.query_map(params![trip_id, day_number], |row| {
                Ok(TransitSegment {
                    slot_id: row.get(0)?,
                    sort_order: row.get(1)?,
                    end_time: row
                        .get::<_, Option<String>>(2)?
                        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                        .map(|t| t.with_timezone(&Utc)),
                    origin_node_id: row.get(3)?,
                    destination_node_id: row.get(4)?,
                    origin_lat: row.get(5)?,
                    origin_lon: row.get(6)?,
                    destination_lat: row.get(7)?,
                    destination_lon: row.get(8)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn has_existing_flex_after(&self, trip_id: &str, day_number: i32, sort_order: i32) -> anyhow::Result<bool> {
        self.db.with_conn(|conn| {
            let found: Option<String> = conn
                .query_row(
                    r#"SELECT id FROM itinerary_slots
                       WHERE trip_id = ?1 AND day_number = ?2 AND sort_order = ?3 AND slot_type = 'flex'
                       LIMIT 1"#,
                    params![trip_id, day_number, sort_order + 1],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    fn evaluate_segment(
        &self,
        trip_id: &str,
        day_number: i32,
        segment: &TransitSegment,
    ) -> anyhow::Result<Option<MicroStopInsertion>> {
        if self.has_existing_flex_after(trip_id, day_number, segment.sort_order)? {
            tracing::debug!(slot = %segment.slot_id, "skipping segment — flex slot already follows");
            return Ok(None);
        }

        let mut excluded = Vec::new();
        excluded.extend(segment.origin_node_id.clone());
        excluded.extend(segment.destination_node_id.clone());

        let candidates: Vec<SpatialCandidate> = find_nodes_along_path(
            &self.db,
            segment.origin_lat,
            segment.origin_lon,
            segment.destination_lat,
            segment.destination_lon,
            trip_id,
            day_number,
            &excluded,
        );

        let Some(top) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let duration = top.duration_minutes;
        let (start_time, end_time) = match segment.end_time {
            Some(t) => (Some(t), Some(t + Duration::minutes(duration as i64))),
            None => (None, None),
        };

        let new_slot_id = Uuid::new_v4().to_string();
        let new_sort_order = segment.sort_order + 1;

        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                r#"UPDATE itinerary_slots SET sort_order = sort_order + 1
                   WHERE trip_id = ?1 AND day_number = ?2 AND sort_order >= ?3 AND id != ?4"#,
                params![trip_id, day_number, new_sort_order, segment.slot_id],
            )?;
            tx.execute(
                r#"INSERT INTO itinerary_slots (
                       id, trip_id, activity_node_id, day_number, sort_order,
                       slot_type, status, start_time, end_time, duration_minutes, is_locked
                   ) VALUES (?1, ?2, ?3, ?4, ?5, 'flex', 'proposed', ?6, ?7, ?8, 0)
                   ON CONFLICT DO NOTHING"#,
                params![
                    new_slot_id,
                    trip_id,
                    top.activity_node_id,
                    day_number,
                    new_sort_order,
                    start_time.map(|t| t.to_rfc3339()),
                    end_time.map(|t| t.to_rfc3339()),
                    duration,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        let mut signal = BehavioralSignal::new(
            "system".to_string(),
            trip_id.to_string(),
            SignalType::PreTripSlotAdded,
            0.0,
            TripPhase::Active,
            "microstop_suggested".to_string(),
        )
        .with_activity_node(top.activity_node_id.clone())
        .with_subflow("microstops".to_string())
        .with_source("system_generated".to_string());
        signal.slot_id = Some(new_slot_id.clone());
        SignalStore::new(self.db.clone()).store(signal)?;

        tracing::info!(
            slot = %new_slot_id,
            node = %top.activity_node_id,
            after_transit = %segment.slot_id,
            duration_minutes = duration,
            "micro-stop inserted"
        );

        Ok(Some(MicroStopInsertion {
            new_slot_id,
            activity_node_id: top.activity_node_id,
            activity_name: top.name,
            inserted_after_slot_id: segment.slot_id.clone(),
            sort_order: new_sort_order,
            start_time,
            end_time,
            duration_minutes: duration,
            convergence_score: top.convergence_score,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_node(db: &Db, id: &str, lat: f64, lon: f64, score: f64) {
        db.with_conn_mut(|conn| {
            conn.execute(
                r#"INSERT INTO activity_nodes (id, name, category, lat, lon, convergence_score, status, is_canonical)
                   VALUES (?1, ?1, 'dining', ?2, ?3, ?4, 'approved', 1)"#,
                params![id, lat, lon, score],
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn seed_slot(
        db: &Db,
        id: &str,
        trip_id: &str,
        day: i32,
        sort_order: i32,
        slot_type: &str,
        activity_node_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) {
        db.with_conn_mut(|conn| {
            conn.execute(
                r#"INSERT INTO itinerary_slots (id, trip_id, day_number, sort_order, slot_type, status, start_time, end_time, activity_node_id, is_locked)
                   VALUES (?1, ?2, ?3, ?4, ?5, 'confirmed', ?6, ?7, ?8, 0)"#,
                params![
                    id,
                    trip_id,
                    day,
                    sort_order,
                    slot_type,
                    start.map(|t| t.to_rfc3339()),
                    end.map(|t| t.to_rfc3339()),
                    activity_node_id,
                ],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn inserts_a_flex_slot_after_a_transit_segment() {
        let db = Db::open_in_memory().unwrap();
        let base = Utc::now();

        seed_node(&db, "origin-node", 0.0, 0.0, 0.8);
        seed_node(&db, "dest-node", 0.002, 0.0, 0.8);
        seed_node(&db, "micro-node", 0.0006, 0.0, 0.8);

        seed_slot(&db, "s1", "trip-1", 1, 1, "anchor", Some("origin-node"), Some(base), Some(base));
        seed_slot(&db, "s2", "trip-1", 1, 2, "transit", None, Some(base), Some(base + Duration::minutes(15)));
        seed_slot(&db, "s3", "trip-1", 1, 3, "anchor", Some("dest-node"), Some(base + Duration::minutes(15)), Some(base + Duration::minutes(30)));

        let service = MicroStopService::new(db);
        let result = service.suggest_for_day("trip-1", 1).unwrap();

        assert_eq!(result.transit_segments_evaluated, 1);
        assert_eq!(result.inserted_count(), 1);
        assert_eq!(result.insertions[0].activity_node_id, "micro-node");
    }

    #[test]
    fn skips_when_flex_slot_already_follows() {
        let db = Db::open_in_memory().unwrap();
        let base = Utc::now();

        seed_node(&db, "origin-node", 0.0, 0.0, 0.8);
        seed_node(&db, "dest-node", 0.002, 0.0, 0.8);
        seed_node(&db, "micro-node", 0.0006, 0.0, 0.8);

        seed_slot(&db, "s1", "trip-1", 1, 1, "anchor", Some("origin-node"), Some(base), Some(base));
        seed_slot(&db, "s2", "trip-1", 1, 2, "transit", None, Some(base), Some(base + Duration::minutes(15)));
        seed_slot(&db, "s3", "trip-1", 1, 3, "flex", None, None, None);
        seed_slot(&db, "s4", "trip-1", 1, 4, "anchor", Some("dest-node"), Some(base + Duration::minutes(15)), Some(base + Duration::minutes(30)));

        let service = MicroStopService::new(db);
        let result = service.suggest_for_day("trip-1", 1).unwrap();

        assert_eq!(result.inserted_count(), 0);
    }

    #[test]
    fn no_transit_segments_produces_a_warning() {
        let db = Db::open_in_memory().unwrap();
        let service = MicroStopService::new(db);
        let result = service.suggest_for_day("trip-empty", 1).unwrap();
        assert_eq!(result.transit_segments_evaluated, 0);
        assert!(!result.warnings.is_empty());
    }
}
