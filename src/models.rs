//! Shared domain entities (see data model).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tiered taxonomy of behavioral events. See `signals::taxonomy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    SlotConfirmed,
    SlotRejected,
    PreTripSlotSwap,
    PreTripSlotRemoved,
    SlotLocked,
    PreTripSlotAdded,
    PreTripReorder,
    DiscoverShortlist,
    CardViewed,
    CardDismissed,
    SlotMoved,
    DiscoverSwipeRight,
    DiscoverSwipeLeft,
    CardImpression,
    PivotAccepted,
    PivotRejected,
    DwellTime,
    /// Types outside the fixed taxonomy still round-trip, defaulting to tier 4.
    #[serde(other)]
    Unknown,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::SlotConfirmed => "slot_confirmed",
            SignalType::SlotRejected => "slot_rejected",
            SignalType::PreTripSlotSwap => "pre_trip_slot_swap",
            SignalType::PreTripSlotRemoved => "pre_trip_slot_removed",
            SignalType::SlotLocked => "slot_locked",
            SignalType::PreTripSlotAdded => "pre_trip_slot_added",
            SignalType::PreTripReorder => "pre_trip_reorder",
            SignalType::DiscoverShortlist => "discover_shortlist",
            SignalType::CardViewed => "card_viewed",
            SignalType::CardDismissed => "card_dismissed",
            SignalType::SlotMoved => "slot_moved",
            SignalType::DiscoverSwipeRight => "discover_swipe_right",
            SignalType::DiscoverSwipeLeft => "discover_swipe_left",
            SignalType::CardImpression => "card_impression",
            SignalType::PivotAccepted => "pivot_accepted",
            SignalType::PivotRejected => "pivot_rejected",
            SignalType::DwellTime => "dwell_time",
            SignalType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripPhase {
    PreTrip,
    Active,
    PostTrip,
}

/// A typed, weighted behavioral record. `signal_weight` is server-only and must
/// never be serialized into a client-facing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralSignal {
    pub id: Option<String>,
    pub user_id: String,
    pub trip_id: String,
    pub activity_node_id: Option<String>,
    pub slot_id: Option<String>,
    pub signal_type: SignalType,
    pub signal_value: f64,
    pub trip_phase: TripPhase,
    pub raw_action: String,
    pub source: String,
    pub subflow: Option<String>,
    /// Server-side only weight in [-1.0, 3.0].
    #[serde(skip_serializing)]
    pub signal_weight: f64,
    pub created_at: DateTime<Utc>,
}

impl BehavioralSignal {
    pub fn new(
        user_id: String,
        trip_id: String,
        signal_type: SignalType,
        signal_value: f64,
        trip_phase: TripPhase,
        raw_action: String,
    ) -> Self {
        Self {
            id: None,
            user_id,
            trip_id,
            activity_node_id: None,
            slot_id: None,
            signal_type,
            signal_value,
            trip_phase,
            raw_action,
            source: "user_behavioral".to_string(),
            subflow: None,
            signal_weight: 0.0,
            created_at: Utc::now(),
        }
    }

    pub fn with_activity_node(mut self, activity_node_id: String) -> Self {
        self.activity_node_id = Some(activity_node_id);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.signal_weight = weight;
        self
    }

    pub fn with_subflow(mut self, subflow: String) -> Self {
        self.subflow = Some(subflow);
        self
    }

    pub fn with_source(mut self, source: String) -> Self {
        self.source = source;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityNode {
    pub id: String,
    pub name: String,
    pub category: String,
    pub lat: f64,
    pub lon: f64,
    pub convergence_score: f64,
    pub tourist_score: f64,
    pub cant_miss: bool,
    pub impression_count: i64,
    pub acceptance_count: i64,
    pub behavioral_quality_score: f64,
    pub status: String,
    pub price_level: Option<i32>,
    pub description_short: Option<String>,
    pub primary_image_url: Option<String>,
    pub neighborhood: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    Anchor,
    Meal,
    Flex,
    Transit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItinerarySlot {
    pub id: String,
    pub trip_id: String,
    pub day_number: i32,
    pub sort_order: i32,
    pub slot_type: SlotType,
    pub status: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub is_locked: bool,
    pub activity_node_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Skipped,
    Error,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Skipped => "skipped",
            AuditStatus::Error => "error",
        }
    }
}

/// Source of an inferred (or confirmed) intention behind a `BehavioralSignal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentionSource {
    /// The user answered a post-trip disambiguation prompt directly.
    ExplicitFeedback,
    /// Inferred by the rule-based disambiguation engine.
    RuleHeuristic,
}

impl IntentionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentionSource::ExplicitFeedback => "explicit_feedback",
            IntentionSource::RuleHeuristic => "rule_heuristic",
        }
    }
}

/// A typed interpretation of why a `BehavioralSignal` happened the way it
/// did (e.g. why a slot was skipped). Append-only: at most one row per
/// `(behavioral_signal_id, source)` pair. An `explicit_feedback` row for a
/// signal permanently suppresses `rule_heuristic` inference for that signal
/// — see `signals::disambiguation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentionSignal {
    pub id: Option<String>,
    pub behavioral_signal_id: String,
    pub intention_type: String,
    pub intention_value: String,
    /// In `[0.0, 1.0]`.
    pub confidence: f64,
    pub source: IntentionSource,
    pub created_at: DateTime<Utc>,
}

/// A pending request to resolve an unmatched off-plan place name into a
/// corpus `ActivityNode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusIngestionRequest {
    pub id: String,
    pub raw_place_name: String,
    pub trip_id: String,
    pub user_id: String,
    pub source: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}
