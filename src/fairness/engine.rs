//! Tracks and resolves preference debt across group-trip members.
//!
//! A member accumulates positive debt when the group picks something they
//! ranked lower than the consensus, and pays it down when the group picks
//! one of their top choices. Fully deterministic: same state + same votes
//! always produce the same output.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

const DEBT_SCALE: f64 = 1.0;
const MAX_DEBT: f64 = 10.0;
const MIN_BOOST_WEIGHT: f64 = 0.05;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberDebt {
    pub member_id: String,
    pub cumulative_debt: f64,
    pub vote_count: u32,
    pub compromise_count: u32,
}

impl MemberDebt {
    fn new(member_id: &str) -> Self {
        Self {
            member_id: member_id.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FairnessState {
    pub members: HashMap<String, MemberDebt>,
    pub total_votes: u32,
    pub last_updated_slot: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FairnessSummary {
    pub total_votes: u32,
    pub last_updated_slot: Option<String>,
    pub member_debts: Vec<MemberDebt>,
    pub most_compromised: Option<String>,
    pub least_compromised: Option<String>,
}

#[derive(Default)]
pub struct FairnessEngine;

impl FairnessEngine {
    /// Record a resolved vote, returning a new state (input is left
    /// untouched — the engine is pure).
    pub fn record_vote(
        &self,
        state: &FairnessState,
        slot_id: &str,
        member_preference_ranks: &HashMap<String, i32>,
        group_choice_rank: i32,
    ) -> FairnessState {
        let mut new_state = state.clone();

        for (member_id, &member_rank) in member_preference_ranks {
            let debt_record = new_state
                .members
                .entry(member_id.clone())
                .or_insert_with(|| MemberDebt::new(member_id));

            let debt_delta = (member_rank - group_choice_rank) as f64 * DEBT_SCALE;
            debt_record.cumulative_debt = (debt_record.cumulative_debt + debt_delta).clamp(-MAX_DEBT, MAX_DEBT);
            debt_record.vote_count += 1;
            if debt_delta > 0.0 {
                debt_record.compromise_count += 1;
            }

            tracing::debug!(member = %member_id, slot = %slot_id, delta = debt_delta, total = debt_record.cumulative_debt, "fairness debt updated");
        }

        new_state.total_votes += 1;
        new_state.last_updated_slot = Some(slot_id.to_string());
        new_state
    }

    /// `weight[member] = 1 / (1 + max(0, debt))`, floored at 0.05, normalized
    /// to sum 1.0.
    pub fn conflict_weights(&self, state: &FairnessState, member_ids: &[String]) -> HashMap<String, f64> {
        if member_ids.is_empty() {
            return HashMap::new();
        }

        let raw: HashMap<String, f64> = member_ids
            .iter()
            .map(|mid| {
                let cumulative = state.members.get(mid).map(|d| d.cumulative_debt).unwrap_or(0.0);
                let w = 1.0 / (1.0 + cumulative.max(0.0));
                (mid.clone(), w.max(MIN_BOOST_WEIGHT))
            })
            .collect();

        let total: f64 = raw.values().sum();
        raw.into_iter().map(|(mid, w)| (mid, w / total)).collect()
    }

    pub fn most_compromised_member(&self, state: &FairnessState, member_ids: &[String]) -> Option<String> {
        member_ids
            .iter()
            .max_by(|a, b| {
                let da = state.members.get(*a).map(|d| d.cumulative_debt).unwrap_or(0.0);
                let db = state.members.get(*b).map(|d| d.cumulative_debt).unwrap_or(0.0);
                da.partial_cmp(&db).unwrap()
            })
            .cloned()
    }

    pub fn fairness_summary(&self, state: &FairnessState) -> FairnessSummary {
        let mut debts: Vec<MemberDebt> = state.members.values().cloned().collect();
        debts.sort_by(|a, b| b.cumulative_debt.partial_cmp(&a.cumulative_debt).unwrap());

        FairnessSummary {
            total_votes: state.total_votes,
            last_updated_slot: state.last_updated_slot.clone(),
            most_compromised: debts.first().map(|d| d.member_id.clone()),
            least_compromised: debts.last().map(|d| d.member_id.clone()),
            member_debts: debts,
        }
    }
}
