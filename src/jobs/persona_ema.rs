//! Nightly persona dimension updater. Applies a weighted exponential moving
//! average to each user's `PersonaDimension` confidences from the day's
//! behavioral signals, joined through slot to activity category.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::db::Db;
use crate::jobs::audit::{already_succeeded, resolve_target_date};

const EMA_ALPHA: f64 = 0.3;
const MID_TRIP_ALPHA_MULTIPLIER: f64 = 3.0;
const MIN_SIGNALS_FOR_UPDATE: u32 = 2;
const DEFAULT_CONFIDENCE: f64 = 0.5;

const POSITIVE_SIGNAL_TYPES: &[&str] = &["slot_confirm", "slot_complete", "post_loved", "discover_shortlist", "discover_swipe_right"];
const NEGATIVE_SIGNAL_TYPES: &[&str] = &["slot_skip", "slot_reject", "post_disliked", "discover_swipe_left"];

struct DimensionMapping {
    dimension: &'static str,
    positive_value: &'static str,
    weight: f64,
}

fn category_dimension_map(category: &str) -> &'static [DimensionMapping] {
    macro_rules! map {
        ($($dim:expr, $val:expr, $w:expr);* $(;)?) => {
            &[$(DimensionMapping { dimension: $dim, positive_value: $val, weight: $w }),*]
        };
    }
    match category {
        "restaurant" => map!("food_priority", "food_driven", 1.0),
        "cafe" => map!(
            "food_priority", "food_driven", 0.6;
            "pace_preference", "slow_traveler", 0.3;
        ),
        "bar" => map!("nightlife_interest", "nightlife_seeker", 0.8),
        "club" => map!(
            "nightlife_interest", "nightlife_seeker", 1.0;
            "energy_level", "high_energy", 0.5;
        ),
        "museum" => map!("culture_engagement", "culture_immersive", 1.0),
        "temple" => map!(
            "culture_engagement", "culture_immersive", 0.8;
            "authenticity_preference", "authenticity_driven", 0.5;
        ),
        "gallery" => map!("culture_engagement", "culture_immersive", 0.7),
        "market" => map!(
            "food_priority", "food_driven", 0.5;
            "authenticity_preference", "authenticity_driven", 0.6;
        ),
        "park" => map!(
            "nature_preference", "nature_driven", 0.8;
            "energy_level", "medium_energy", 0.3;
        ),
        "hike" => map!(
            "nature_preference", "nature_driven", 1.0;
            "energy_level", "high_energy", 0.7;
        ),
        "viewpoint" => map!("nature_preference", "nature_curious", 0.5),
        "onsen" => map!(
            "pace_preference", "slow_traveler", 0.6;
            "authenticity_preference", "authenticity_driven", 0.4;
        ),
        "shopping" => map!("budget_orientation", "moderate_spender", 0.4),
        "neighborhood" => map!(
            "authenticity_preference", "locally_curious", 0.7;
            "pace_preference", "slow_traveler", 0.4;
        ),
        "entertainment" => map!(
            "energy_level", "high_energy", 0.5;
            "social_orientation", "social_explorer", 0.4;
        ),
        _ => &[],
    }
}

fn default_value_for_dimension(dimension: &str) -> &'static str {
    match dimension {
        "energy_level" => "medium_energy",
        "social_orientation" => "small_group",
        "planning_style" => "flexible",
        "budget_orientation" => "moderate_spender",
        "food_priority" => "food_balanced",
        "culture_engagement" => "culture_moderate",
        "nature_preference" => "nature_curious",
        "nightlife_interest" => "balanced_schedule",
        "authenticity_preference" => "locally_curious",
        "pace_preference" => "moderate_pace",
        _ => "unknown",
    }
}

/// Weighted EMA toward 1.0 (positive) or 0.0 (negative), clamped to [0.05, 0.98].
pub fn compute_ema(current_confidence: f64, signal_direction: f64, alpha: f64, weight: f64) -> f64 {
    let target = if signal_direction > 0.0 { 1.0 } else { 0.0 };
    let effective_alpha = alpha * weight;
    let new_confidence = effective_alpha * target + (1.0 - effective_alpha) * current_confidence;
    new_confidence.clamp(0.05, 0.98)
}

fn effective_alpha(trip_phase: &str) -> f64 {
    if trip_phase == "active" {
        (EMA_ALPHA * MID_TRIP_ALPHA_MULTIPLIER).min(1.0)
    } else {
        EMA_ALPHA
    }
}

struct RawSignal {
    signal_type: String,
    trip_phase: String,
    category: String,
}

struct PersonaRow {
    value: String,
    confidence: f64,
}

fn build_dimension_updates(
    signals: &[RawSignal],
    current_persona: &HashMap<String, PersonaRow>,
) -> HashMap<String, f64> {
    let mut confidences: HashMap<String, f64> =
        current_persona.iter().map(|(dim, row)| (dim.clone(), row.confidence)).collect();
    let mut counts: HashMap<String, u32> = HashMap::new();

    for sig in signals {
        let category = sig.category.to_lowercase();
        let mappings = category_dimension_map(&category);
        if mappings.is_empty() {
            continue;
        }

        let is_positive = POSITIVE_SIGNAL_TYPES.contains(&sig.signal_type.as_str());
        let is_negative = NEGATIVE_SIGNAL_TYPES.contains(&sig.signal_type.as_str());
        if !is_positive && !is_negative {
            continue;
        }

        let direction = if is_positive { 1.0 } else { -1.0 };
        let alpha = effective_alpha(&sig.trip_phase);

        for mapping in mappings {
            *counts.entry(mapping.dimension.to_string()).or_insert(0) += 1;
            let current = *confidences.get(mapping.dimension).unwrap_or(&DEFAULT_CONFIDENCE);
            confidences.insert(mapping.dimension.to_string(), compute_ema(current, direction, alpha, mapping.weight));
        }
    }

    confidences
        .into_iter()
        .filter(|(dim, _)| counts.get(dim).copied().unwrap_or(0) >= MIN_SIGNALS_FOR_UPDATE)
        .collect()
}

#[derive(Debug, Serialize)]
pub struct PersonaUpdateResult {
    pub date: String,
    pub status: &'static str,
    pub users_updated: i64,
    pub dimensions_updated: i64,
    pub duration_ms: i64,
}

pub fn run_persona_update(db: &Db, target_date: Option<NaiveDate>) -> Result<PersonaUpdateResult> {
    let target_date = resolve_target_date(target_date);
    let date_label = target_date.to_string();
    let start = Instant::now();

    let skip = db.with_conn(|conn| already_succeeded(conn, "persona_update_runs", target_date))?;
    if skip {
        tracing::info!(date = %date_label, "persona_updater: already succeeded, skipping");
        return Ok(PersonaUpdateResult {
            date: date_label,
            status: "skipped",
            users_updated: 0,
            dimensions_updated: 0,
            duration_ms: start.elapsed().as_millis() as i64,
        });
    }

    let day_start = target_date.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let day_end = day_start + chrono::Duration::days(1);
    let all_types: HashSet<&str> = POSITIVE_SIGNAL_TYPES.iter().chain(NEGATIVE_SIGNAL_TYPES).copied().collect();

    let outcome = db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;

        let mut by_user: HashMap<String, Vec<RawSignal>> = HashMap::new();
        {
            let mut stmt = tx.prepare(
                r#"SELECT bs.user_id, bs.signal_type, bs.trip_phase, an.category
                   FROM behavioral_signals bs
                   JOIN itinerary_slots isl ON isl.id = bs.slot_id
                   JOIN activity_nodes an ON an.id = isl.activity_node_id
                   WHERE bs.source = 'user_behavioral' AND bs.slot_id IS NOT NULL
                     AND bs.created_at >= ?1 AND bs.created_at < ?2"#,
            )?;
            let rows = stmt.query_map(params![day_start.to_rfc3339(), day_end.to_rfc3339()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    RawSignal {
                        signal_type: row.get(1)?,
                        trip_phase: row.get(2)?,
                        category: row.get(3)?,
                    },
                ))
            })?;
            for row in rows {
                let (user_id, signal) = row?;
                if !all_types.contains(signal.signal_type.as_str()) {
                    continue;
                }
                by_user.entry(user_id).or_default().push(signal);
            }
        }

        let mut users_updated = 0i64;
        let mut dimensions_updated = 0i64;

        for (user_id, signals) in &by_user {
            let mut current_persona: HashMap<String, PersonaRow> = HashMap::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT dimension, value, confidence FROM persona_dimensions WHERE user_id = ?1",
                )?;
                let rows = stmt.query_map(params![user_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        PersonaRow {
                            value: row.get(1)?,
                            confidence: row.get(2)?,
                        },
                    ))
                })?;
                for row in rows {
                    let (dim, persona) = row?;
                    current_persona.insert(dim, persona);
                }
            }

            let updates = build_dimension_updates(signals, &current_persona);
            if updates.is_empty() {
                continue;
            }

            for (dim, new_confidence) in &updates {
                let existing_value = current_persona
                    .get(dim)
                    .map(|p| p.value.clone())
                    .unwrap_or_else(|| default_value_for_dimension(dim).to_string());
                tx.execute(
                    r#"INSERT INTO persona_dimensions (user_id, dimension, value, confidence, source, updated_at)
                       VALUES (?1, ?2, ?3, ?4, 'behavioral_ema', ?5)
                       ON CONFLICT (user_id, dimension) DO UPDATE SET
                           confidence = excluded.confidence,
                           source = excluded.source,
                           updated_at = excluded.updated_at"#,
                    params![user_id, dim, existing_value, new_confidence, Utc::now().to_rfc3339()],
                )?;
                dimensions_updated += 1;
            }
            users_updated += 1;
        }

        let duration_ms = start.elapsed().as_millis() as i64;
        tx.execute(
            r#"INSERT INTO persona_update_runs (run_date, status, users_updated, dimensions_updated, duration_ms, created_at)
               VALUES (?1, 'success', ?2, ?3, ?4, ?5)"#,
            params![target_date.to_string(), users_updated, dimensions_updated, duration_ms, Utc::now().to_rfc3339()],
        )?;

        tx.commit()?;
        Ok((users_updated, dimensions_updated))
    });

    let (users_updated, dimensions_updated) = match outcome {
        Ok(v) => v,
        Err(err) => {
            let duration_ms = start.elapsed().as_millis() as i64;
            tracing::error!(date = %date_label, error = %err, "persona_updater: failed");
            let _ = db.with_conn(|conn| {
                conn.execute(
                    r#"INSERT INTO persona_update_runs (run_date, status, users_updated, dimensions_updated, duration_ms, error_message, created_at)
                       VALUES (?1, 'error', 0, 0, ?2, ?3, ?4)"#,
                    params![target_date.to_string(), duration_ms, err.to_string(), Utc::now().to_rfc3339()],
                )
            });
            return Err(err);
        }
    };

    let duration_ms = start.elapsed().as_millis() as i64;
    tracing::info!(date = %date_label, users_updated, dimensions_updated, duration_ms, "persona_updater: complete");
    Ok(PersonaUpdateResult {
        date: date_label,
        status: "success",
        users_updated,
        dimensions_updated,
        duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_moves_toward_target_and_clamps() {
        let up = compute_ema(0.5, 1.0, 0.3, 1.0);
        assert!((up - 0.65).abs() < 1e-9);
        let saturated = compute_ema(0.98, 1.0, 1.0, 1.0);
        assert_eq!(saturated, 0.98);
        let floor = compute_ema(0.05, -1.0, 1.0, 1.0);
        assert_eq!(floor, 0.05);
    }

    #[test]
    fn active_phase_triples_alpha_capped_at_one() {
        assert_eq!(effective_alpha("active"), 0.9);
        assert_eq!(effective_alpha("pre_trip"), 0.3);
    }

    #[test]
    fn dimension_with_single_signal_is_dropped() {
        let signals = vec![RawSignal {
            signal_type: "slot_confirm".into(),
            trip_phase: "pre_trip".into(),
            category: "restaurant".into(),
        }];
        let updates = build_dimension_updates(&signals, &HashMap::new());
        assert!(updates.is_empty());
    }

    #[test]
    fn dimension_with_two_signals_updates() {
        let signals = vec![
            RawSignal {
                signal_type: "slot_confirm".into(),
                trip_phase: "pre_trip".into(),
                category: "restaurant".into(),
            },
            RawSignal {
                signal_type: "discover_shortlist".into(),
                trip_phase: "pre_trip".into(),
                category: "restaurant".into(),
            },
        ];
        let updates = build_dimension_updates(&signals, &HashMap::new());
        assert!(updates.contains_key("food_priority"));
    }
}
