//! Rule-based inference of `IntentionSignal`s from `BehavioralSignal`s.
//!
//! Explicit feedback (`source = explicit_feedback`) always takes precedence:
//! once a signal has one, rule-based inference is permanently suppressed
//! for that signal. Rule inference is also idempotent — a signal already
//! carrying a `rule_heuristic` row is not re-evaluated.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db::Db;
use crate::models::{IntentionSignal, IntentionSource};

const INTENTION_TYPE_SKIP_REASON: &str = "skip_reason";

/// Reason inferred for why a slot was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotInterested,
    BadTiming,
    TooFar,
    AlreadyVisited,
    Weather,
    GroupConflict,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotInterested => "not_interested",
            SkipReason::BadTiming => "bad_timing",
            SkipReason::TooFar => "too_far",
            SkipReason::AlreadyVisited => "already_visited",
            SkipReason::Weather => "weather",
            SkipReason::GroupConflict => "group_conflict",
        }
    }
}

const BAD_WEATHER_CONDITIONS: &[&str] = &["rain", "storm", "snow", "drizzle"];

/// Context the caller assembles from the signal and its surrounding trip /
/// weather / group state at the time it's recorded. Every field is optional
/// because not every signal carries every kind of context.
#[derive(Debug, Clone, Default)]
pub struct SignalContext {
    pub weather_condition: Option<String>,
    pub time_overrun_minutes: Option<f64>,
    pub distance_km: Option<f64>,
    pub is_group_trip: Option<bool>,
    pub has_preference_conflict: Option<bool>,
    pub previously_visited: Option<bool>,
}

/// Evaluate the fixed rule set in order; the first matching rule wins.
/// Returns `None` if no rule matches.
pub fn infer_intention(ctx: &SignalContext) -> Option<(SkipReason, f64)> {
    if ctx.previously_visited == Some(true) {
        return Some((SkipReason::AlreadyVisited, 0.9));
    }
    if let Some(condition) = &ctx.weather_condition {
        if BAD_WEATHER_CONDITIONS.contains(&condition.to_lowercase().as_str()) {
            return Some((SkipReason::Weather, 0.85));
        }
    }
    if ctx.distance_km.map(|d| d > 5.0) == Some(true) {
        return Some((SkipReason::TooFar, 0.8));
    }
    if ctx.time_overrun_minutes.map(|m| m > 30.0) == Some(true) {
        return Some((SkipReason::BadTiming, 0.75));
    }
    if ctx.is_group_trip == Some(true) && ctx.has_preference_conflict == Some(true) {
        return Some((SkipReason::GroupConflict, 0.7));
    }
    if ctx.has_preference_conflict == Some(true) {
        return Some((SkipReason::NotInterested, 0.6));
    }
    None
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome")]
pub enum DisambiguationOutcome {
    Created(IntentionSignal),
    SuppressedByExplicitFeedback,
    AlreadyInferred,
    NoRuleMatched,
}

fn has_source(db: &Db, behavioral_signal_id: &str, source: IntentionSource) -> Result<bool> {
    db.with_conn(|conn| {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM intention_signals WHERE behavioral_signal_id = ?1 AND source = ?2 LIMIT 1",
                params![behavioral_signal_id, source.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    })
}

/// Infer and persist a `rule_heuristic` `IntentionSignal` for
/// `behavioral_signal_id`, honoring the explicit-feedback suppression
/// invariant and rule-inference idempotency.
pub fn infer_and_record(
    db: &Db,
    behavioral_signal_id: &str,
    ctx: &SignalContext,
) -> Result<DisambiguationOutcome> {
    if has_source(db, behavioral_signal_id, IntentionSource::ExplicitFeedback)? {
        tracing::debug!(signal = %behavioral_signal_id, "explicit feedback present, skipping rule inference");
        return Ok(DisambiguationOutcome::SuppressedByExplicitFeedback);
    }
    if has_source(db, behavioral_signal_id, IntentionSource::RuleHeuristic)? {
        return Ok(DisambiguationOutcome::AlreadyInferred);
    }

    let Some((reason, confidence)) = infer_intention(ctx) else {
        return Ok(DisambiguationOutcome::NoRuleMatched);
    };

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    db.with_conn(|conn| {
        conn.execute(
            r#"INSERT INTO intention_signals (
                   id, behavioral_signal_id, intention_type, intention_value,
                   confidence, source, created_at
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                id,
                behavioral_signal_id,
                INTENTION_TYPE_SKIP_REASON,
                reason.as_str(),
                confidence,
                IntentionSource::RuleHeuristic.as_str(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    })?;

    tracing::info!(
        signal = %behavioral_signal_id,
        intention = reason.as_str(),
        confidence,
        "intention signal inferred"
    );

    Ok(DisambiguationOutcome::Created(IntentionSignal {
        id: Some(id),
        behavioral_signal_id: behavioral_signal_id.to_string(),
        intention_type: INTENTION_TYPE_SKIP_REASON.to_string(),
        intention_value: reason.as_str().to_string(),
        confidence,
        source: IntentionSource::RuleHeuristic,
        created_at: now,
    }))
}

/// Record an explicit-feedback `IntentionSignal`, e.g. from a resolved
/// post-trip disambiguation prompt. Always wins over — and suppresses —
/// any later rule-based inference for the same signal.
pub fn record_explicit_feedback(
    db: &Db,
    behavioral_signal_id: &str,
    intention_type: &str,
    intention_value: &str,
) -> Result<IntentionSignal> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    db.with_conn(|conn| {
        conn.execute(
            r#"INSERT INTO intention_signals (
                   id, behavioral_signal_id, intention_type, intention_value,
                   confidence, source, created_at
               ) VALUES (?1, ?2, ?3, ?4, 1.0, ?5, ?6)
               ON CONFLICT (behavioral_signal_id, source) DO UPDATE SET
                   intention_type = excluded.intention_type,
                   intention_value = excluded.intention_value,
                   created_at = excluded.created_at"#,
            params![
                id,
                behavioral_signal_id,
                intention_type,
                intention_value,
                IntentionSource::ExplicitFeedback.as_str(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    })?;

    Ok(IntentionSignal {
        id: Some(id),
        behavioral_signal_id: behavioral_signal_id.to_string(),
        intention_type: intention_type.to_string(),
        intention_value: intention_value.to_string(),
        confidence: 1.0,
        source: IntentionSource::ExplicitFeedback,
        created_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previously_visited_outranks_every_other_condition() {
        let ctx = SignalContext {
            previously_visited: Some(true),
            distance_km: Some(50.0),
            ..Default::default()
        };
        assert_eq!(infer_intention(&ctx), Some((SkipReason::AlreadyVisited, 0.9)));
    }

    #[test]
    fn bad_weather_condition_is_detected_case_insensitively() {
        let ctx = SignalContext {
            weather_condition: Some("Storm".to_string()),
            ..Default::default()
        };
        assert_eq!(infer_intention(&ctx), Some((SkipReason::Weather, 0.85)));
    }

    #[test]
    fn no_matching_condition_yields_none() {
        assert_eq!(infer_intention(&SignalContext::default()), None);
    }

    #[test]
    fn rule_inference_is_persisted_and_idempotent() {
        let db = Db::open_in_memory().unwrap();
        let ctx = SignalContext {
            distance_km: Some(12.0),
            ..Default::default()
        };

        let first = infer_and_record(&db, "sig-1", &ctx).unwrap();
        assert!(matches!(first, DisambiguationOutcome::Created(_)));

        let second = infer_and_record(&db, "sig-1", &ctx).unwrap();
        assert!(matches!(second, DisambiguationOutcome::AlreadyInferred));
    }

    #[test]
    fn explicit_feedback_suppresses_rule_inference() {
        let db = Db::open_in_memory().unwrap();
        record_explicit_feedback(&db, "sig-2", "skip_reason", "not_interested").unwrap();

        let ctx = SignalContext {
            distance_km: Some(12.0),
            ..Default::default()
        };
        let outcome = infer_and_record(&db, "sig-2", &ctx).unwrap();
        assert!(matches!(outcome, DisambiguationOutcome::SuppressedByExplicitFeedback));

        let rows: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM intention_signals WHERE behavioral_signal_id = 'sig-2'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn no_rule_match_creates_no_row() {
        let db = Db::open_in_memory().unwrap();
        let outcome = infer_and_record(&db, "sig-3", &SignalContext::default()).unwrap();
        assert!(matches!(outcome, DisambiguationOutcome::NoRuleMatched));
    }
}
