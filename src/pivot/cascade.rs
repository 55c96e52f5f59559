//! Downstream cascade evaluation after a pivot swap.
//!
//! Scope is same-day only: slots with a later `sort_order` than the swapped
//! slot, not locked, not in a terminal status. Cross-day spillover is
//! reported but never auto-cascaded — the caller turns it into a separate
//! pivot event.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::db::Db;

#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub id: String,
    pub day_number: i32,
    pub sort_order: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub is_locked: bool,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotUpdate {
    pub slot_id: String,
    pub new_start_time: Option<DateTime<Utc>>,
    pub new_end_time: Option<DateTime<Utc>>,
    pub sort_order: i32,
}

#[derive(Debug, Serialize)]
pub struct CascadeResult {
    pub pivot_slot_id: String,
    pub day_number: i32,
    pub affected_slot_ids: Vec<String>,
    pub updates: Vec<SlotUpdate>,
    pub delta_minutes: i32,
    pub warning: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CascadeSummary {
    pub slots_updated: i64,
    pub delta_minutes: i32,
    pub affected_ids: Vec<String>,
}

fn duration_delta(old_duration: Option<i32>, new_duration: Option<i32>) -> i32 {
    match (old_duration, new_duration) {
        (Some(old), Some(new)) => new - old,
        _ => 0,
    }
}

/// Evaluate cascade impact after a slot swap. `same_day_slots` must contain
/// every slot for `swapped_slot.day_number`, including the swapped slot.
pub fn evaluate_cascade(
    swapped_slot: &SlotSnapshot,
    new_duration_minutes: Option<i32>,
    same_day_slots: &[SlotSnapshot],
) -> CascadeResult {
    let delta_minutes = duration_delta(swapped_slot.duration_minutes, new_duration_minutes);

    let mut downstream: Vec<&SlotSnapshot> = same_day_slots
        .iter()
        .filter(|s| {
            s.day_number == swapped_slot.day_number
                && s.sort_order > swapped_slot.sort_order
                && !s.is_locked
                && s.status != "completed"
                && s.status != "skipped"
                && s.id != swapped_slot.id
        })
        .collect();
    downstream.sort_by_key(|s| s.sort_order);

    if downstream.is_empty() {
        return CascadeResult {
            pivot_slot_id: swapped_slot.id.clone(),
            day_number: swapped_slot.day_number,
            affected_slot_ids: vec![],
            updates: vec![],
            delta_minutes,
            warning: Some("No downstream slots to cascade.".to_string()),
        };
    }

    if delta_minutes == 0 {
        return CascadeResult {
            pivot_slot_id: swapped_slot.id.clone(),
            day_number: swapped_slot.day_number,
            affected_slot_ids: vec![],
            updates: vec![],
            delta_minutes,
            warning: Some("Duration unchanged — no cascade needed.".to_string()),
        };
    }

    let delta = Duration::minutes(delta_minutes as i64);
    let mut updates = Vec::new();
    let mut affected_ids = Vec::new();

    for slot in downstream {
        updates.push(SlotUpdate {
            slot_id: slot.id.clone(),
            new_start_time: slot.start_time.map(|t| t + delta),
            new_end_time: slot.end_time.map(|t| t + delta),
            sort_order: slot.sort_order,
        });
        affected_ids.push(slot.id.clone());
    }

    tracing::info!(
        swapped = %swapped_slot.id,
        day = swapped_slot.day_number,
        delta_minutes,
        affected = affected_ids.len(),
        "cascade evaluated"
    );

    CascadeResult {
        pivot_slot_id: swapped_slot.id.clone(),
        day_number: swapped_slot.day_number,
        affected_slot_ids: affected_ids,
        updates,
        delta_minutes,
        warning: None,
    }
}

/// Persist cascade updates. Only `start_time`/`end_time` are touched;
/// `sort_order` and every other column are left intact.
pub fn apply_cascade(db: &Db, result: &CascadeResult) -> Result<CascadeSummary> {
    if result.updates.is_empty() {
        return Ok(CascadeSummary {
            slots_updated: 0,
            delta_minutes: 0,
            affected_ids: vec![],
        });
    }

    let updated = db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        let mut count = 0i64;
        for update in &result.updates {
            let rows = tx.execute(
                r#"UPDATE itinerary_slots
                   SET start_time = ?1, end_time = ?2
                   WHERE id = ?3 AND is_locked = 0 AND status NOT IN ('completed', 'skipped')"#,
                params![
                    update.new_start_time.map(|t| t.to_rfc3339()),
                    update.new_end_time.map(|t| t.to_rfc3339()),
                    update.slot_id,
                ],
            );
            match rows {
                Ok(n) => count += n as i64,
                Err(err) => tracing::error!(slot = %update.slot_id, error = %err, "cascade update failed"),
            }
        }
        tx.commit()?;
        Ok(count)
    })?;

    Ok(CascadeSummary {
        slots_updated: updated,
        delta_minutes: result.delta_minutes,
        affected_ids: result.affected_slot_ids.clone(),
    })
}

pub fn fetch_same_day_slots(db: &Db, trip_id: &str, day_number: i32) -> Result<Vec<SlotSnapshot>> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            r#"SELECT id, day_number, sort_order, start_time, end_time, duration_minutes, is_locked, status
               FROM itinerary_slots
               WHERE trip_id = ?1 AND day_number = ?2
               ORDER BY sort_order ASC"#,
        )?;
        let rows = stmt.query_map(params![trip_id, day_number], |row| {
            Ok(SlotSnapshot {
                id: row.get(0)?,
                day_number: row.get(1)?,
                sort_order: row.get(2)?,
                start_time: row
                    .get::<_, Option<String>>(3)?
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|t| t.with_timezone(&Utc)),
                end_time: row
                    .get::<_, Option<String>>(4)?
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|t| t.with_timezone(&Utc)),
                duration_minutes: row.get(5)?,
                is_locked: row.get::<_, i64>(6)? != 0,
                status: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
}

/// True if shifting day `day_number`'s last slot by `delta_minutes` would
/// spill past the start of day `day_number + 1`.
pub fn check_cross_day_impact(db: &Db, trip_id: &str, day_number: i32, delta_minutes: i32) -> Result<bool> {
    if delta_minutes <= 0 {
        return Ok(false);
    }

    db.with_conn(|conn| {
        let last_end: Option<String> = conn
            .query_row(
                r#"SELECT end_time FROM itinerary_slots
                   WHERE trip_id = ?1 AND day_number = ?2 AND end_time IS NOT NULL
                     AND status NOT IN ('completed', 'skipped')
                   ORDER BY sort_order DESC LIMIT 1"#,
                params![trip_id, day_number],
                |row| row.get(0),
            )
            .optional()?;

        let Some(last_end) = last_end else {
            return Ok(false);
        };
        let Ok(last_end) = DateTime::parse_from_rfc3339(&last_end) else {
            return Ok(false);
        };
        let new_last_end = last_end.with_timezone(&Utc) + Duration::minutes(delta_minutes as i64);

        let conflict = conn
            .query_row(
                r#"SELECT id FROM itinerary_slots
                   WHERE trip_id = ?1 AND day_number = ?2 AND start_time IS NOT NULL
                     AND start_time < ?3 AND status NOT IN ('completed', 'skipped')
                   LIMIT 1"#,
                params![trip_id, day_number + 1, new_last_end.to_rfc3339()],
                |_| Ok(()),
            )
            .optional()?;

        Ok(conflict.is_some())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(id: &str, sort_order: i32, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>, duration: Option<i32>) -> SlotSnapshot {
        SlotSnapshot {
            id: id.to_string(),
            day_number: 1,
            sort_order,
            start_time: start,
            end_time: end,
            duration_minutes: duration,
            is_locked: false,
            status: "proposed".to_string(),
        }
    }

    #[test]
    fn longer_duration_shifts_downstream_later() {
        let base = Utc::now();
        let swapped = slot("pivot", 1, Some(base), Some(base + Duration::minutes(60)), Some(60));
        let downstream = slot("next", 2, Some(base + Duration::minutes(60)), Some(base + Duration::minutes(90)), Some(30));

        let result = evaluate_cascade(&swapped, Some(90), &[swapped.clone(), downstream.clone()]);
        assert_eq!(result.affected_slot_ids, vec!["next".to_string()]);
        assert_eq!(result.updates[0].new_start_time, Some(base + Duration::minutes(90)));
    }

    #[test]
    fn locked_slots_are_never_shifted() {
        let base = Utc::now();
        let swapped = slot("pivot", 1, Some(base), Some(base), Some(60));
        let mut locked = slot("next", 2, Some(base), Some(base), Some(30));
        locked.is_locked = true;

        let result = evaluate_cascade(&swapped, Some(90), &[swapped.clone(), locked]);
        assert!(result.affected_slot_ids.is_empty());
    }

    #[test]
    fn unchanged_duration_produces_no_updates() {
        let base = Utc::now();
        let swapped = slot("pivot", 1, Some(base), Some(base), Some(60));
        let downstream = slot("next", 2, Some(base), Some(base), Some(30));
        let result = evaluate_cascade(&swapped, Some(60), &[swapped, downstream]);
        assert!(result.updates.is_empty());
    }

    fn insert_slot(db: &Db, id: &str, day_number: i32, sort_order: i32, start: DateTime<Utc>, end: DateTime<Utc>) {
        db.with_conn_mut(|conn| {
            conn.execute(
                r#"INSERT INTO itinerary_slots (
                       id, trip_id, day_number, sort_order, slot_type, status, start_time, end_time, is_locked
                   ) VALUES (?1, 'trip-1', ?2, ?3, 'anchor', 'confirmed', ?4, ?5, 0)"#,
                params![id, day_number, sort_order, start.to_rfc3339(), end.to_rfc3339()],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn cross_day_spillover_is_detected_when_shift_overtakes_next_day_start() {
        let db = Db::open_in_memory().unwrap();
        let base = Utc::now();
        insert_slot(&db, "d1-last", 1, 1, base, base + Duration::minutes(60));
        insert_slot(&db, "d2-first", 2, 1, base + Duration::minutes(90), base + Duration::minutes(120));

        assert!(check_cross_day_impact(&db, "trip-1", 1, 45).unwrap());
    }

    #[test]
    fn no_spillover_when_shift_stays_within_the_overnight_gap() {
        let db = Db::open_in_memory().unwrap();
        let base = Utc::now();
        insert_slot(&db, "d1-last", 1, 1, base, base + Duration::minutes(60));
        insert_slot(&db, "d2-first", 2, 1, base + Duration::minutes(180), base + Duration::minutes(210));

        assert!(!check_cross_day_impact(&db, "trip-1", 1, 10).unwrap());
    }
}
