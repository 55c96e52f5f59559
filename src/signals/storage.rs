//! Durable storage for `BehavioralSignal` rows.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::db::Db;
use crate::models::{BehavioralSignal, SignalType, TripPhase};

pub struct SignalStore {
    db: Db,
}

impl SignalStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Persist a signal, assigning an id and timestamp if unset. Returns the
    /// stored signal's id.
    pub fn store(&self, mut signal: BehavioralSignal) -> Result<String> {
        if matches!(signal.signal_type, SignalType::Unknown) {
            bail!("signal_type is unknown and is rejected by the write contract");
        }

        let id = signal.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        signal.id = Some(id.clone());

        self.db.with_conn(|conn| {
            conn.execute(
                r#"INSERT INTO behavioral_signals (
                       id, user_id, trip_id, activity_node_id, slot_id,
                       signal_type, signal_value, trip_phase, raw_action,
                       source, subflow, signal_weight, created_at
                   ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
                params![
                    id,
                    signal.user_id,
                    signal.trip_id,
                    signal.activity_node_id,
                    signal.slot_id,
                    signal.signal_type.as_str(),
                    signal.signal_value,
                    trip_phase_str(signal.trip_phase),
                    signal.raw_action,
                    signal.source,
                    signal.subflow,
                    signal.signal_weight,
                    signal.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;

        Ok(id)
    }

    /// Count signals recorded for `activity_node_id` since `since`, used by
    /// nightly write-back to accumulate impression/acceptance counts.
    pub fn count_since(&self, activity_node_id: &str, signal_type: &str, since: DateTime<Utc>) -> Result<i64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                r#"SELECT COUNT(*) FROM behavioral_signals
                   WHERE activity_node_id = ?1 AND signal_type = ?2 AND created_at >= ?3"#,
                params![activity_node_id, signal_type, since.to_rfc3339()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

fn trip_phase_str(phase: TripPhase) -> &'static str {
    match phase {
        TripPhase::PreTrip => "pre_trip",
        TripPhase::Active => "active",
        TripPhase::PostTrip => "post_trip",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalType;

    #[test]
    fn store_assigns_id_and_round_trips_count() {
        let db = Db::open_in_memory().unwrap();
        let store = SignalStore::new(db);
        let signal = BehavioralSignal::new(
            "u1".into(),
            "t1".into(),
            SignalType::CardImpression,
            1.0,
            TripPhase::Active,
            "impression".into(),
        )
        .with_activity_node("node-1".into());

        let id = store.store(signal).unwrap();
        assert!(!id.is_empty());

        let count = store
            .count_since("node-1", "card_impression", Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn unknown_signal_type_is_rejected() {
        let db = Db::open_in_memory().unwrap();
        let store = SignalStore::new(db);
        let signal = BehavioralSignal::new(
            "u1".into(),
            "t1".into(),
            SignalType::Unknown,
            1.0,
            TripPhase::Active,
            "mystery_action".into(),
        );

        assert!(store.store(signal).is_err());
    }
}
