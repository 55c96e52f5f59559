//! Detects when a group converges on a choice that nobody individually
//! wanted — the Abilene paradox. Triggers a dissent prompt rather than
//! silently accepting lukewarm consensus.

use std::collections::HashMap;

use serde::Serialize;

const ENTHUSIASM_THRESHOLD: f64 = 0.4;
const MIN_CANDIDATES_FOR_DETECTION: i32 = 3;

#[derive(Debug, Serialize)]
pub struct AbileneResult {
    pub is_abilene: bool,
    pub member_enthusiasm: HashMap<String, f64>,
    pub group_avg_enthusiasm: f64,
    pub min_enthusiasm: f64,
    pub threshold: f64,
    pub recommendation: Option<String>,
}

pub struct AbileneDetector {
    threshold: f64,
}

impl Default for AbileneDetector {
    fn default() -> Self {
        Self {
            threshold: ENTHUSIASM_THRESHOLD,
        }
    }
}

impl AbileneDetector {
    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }

    /// `enthusiasm = 1 - normalized_rank / denom`, `denom = max(total-1, 1)`.
    /// All-lukewarm (every score below threshold) triggers the paradox flag.
    pub fn detect(
        &self,
        member_preference_ranks: &HashMap<String, i32>,
        total_candidates: i32,
    ) -> AbileneResult {
        if member_preference_ranks.is_empty() {
            return AbileneResult {
                is_abilene: false,
                member_enthusiasm: HashMap::new(),
                group_avg_enthusiasm: 1.0,
                min_enthusiasm: 1.0,
                threshold: self.threshold,
                recommendation: None,
            };
        }

        if total_candidates < MIN_CANDIDATES_FOR_DETECTION {
            return AbileneResult {
                is_abilene: false,
                member_enthusiasm: member_preference_ranks.keys().map(|m| (m.clone(), 1.0)).collect(),
                group_avg_enthusiasm: 1.0,
                min_enthusiasm: 1.0,
                threshold: self.threshold,
                recommendation: None,
            };
        }

        let denom = ((total_candidates - 1).max(1)) as f64;
        let enthusiasm: HashMap<String, f64> = member_preference_ranks
            .iter()
            .map(|(mid, &rank)| (mid.clone(), self.score_enthusiasm(rank, total_candidates, denom)))
            .collect();

        let scores: Vec<f64> = enthusiasm.values().copied().collect();
        let avg = scores.iter().sum::<f64>() / scores.len() as f64;
        let min_score = scores.iter().cloned().fold(f64::INFINITY, f64::min);
        let all_lukewarm = scores.iter().all(|&s| s < self.threshold);

        let recommendation = all_lukewarm.then(|| {
            tracing::info!(avg, min = min_score, "abilene paradox detected");
            "It looks like nobody is particularly excited about this option. Does the group want to explore some alternatives?".to_string()
        });

        AbileneResult {
            is_abilene: all_lukewarm,
            member_enthusiasm: enthusiasm,
            group_avg_enthusiasm: avg,
            min_enthusiasm: min_score,
            threshold: self.threshold,
            recommendation,
        }
    }

    /// Exposed standalone so callers can score a single rank without a full
    /// vote map (e.g. live UI previews).
    pub fn score_enthusiasm(&self, preference_rank: i32, total_candidates: i32, denom: f64) -> f64 {
        let normalized = ((preference_rank - 1).max(0) as f64).min(denom);
        1.0 - normalized / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_choice_scores_full_enthusiasm() {
        let detector = AbileneDetector::default();
        assert_eq!(detector.score_enthusiasm(1, 10, 9.0), 1.0);
    }

    #[test]
    fn last_choice_scores_zero_enthusiasm() {
        let detector = AbileneDetector::default();
        assert_eq!(detector.score_enthusiasm(10, 10, 9.0), 0.0);
    }

    #[test]
    fn all_lukewarm_triggers_abilene() {
        let detector = AbileneDetector::default();
        let ranks = HashMap::from([
            ("u1".to_string(), 8),
            ("u2".to_string(), 9),
            ("u3".to_string(), 7),
        ]);
        let result = detector.detect(&ranks, 10);
        assert!(result.is_abilene);
        assert!(result.recommendation.is_some());
    }

    #[test]
    fn one_enthusiastic_member_prevents_abilene() {
        let detector = AbileneDetector::default();
        let ranks = HashMap::from([("u1".to_string(), 1), ("u2".to_string(), 9)]);
        let result = detector.detect(&ranks, 10);
        assert!(!result.is_abilene);
    }

    #[test]
    fn too_few_candidates_skips_detection() {
        let detector = AbileneDetector::default();
        let ranks = HashMap::from([("u1".to_string(), 2)]);
        let result = detector.detect(&ranks, 2);
        assert!(!result.is_abilene);
        assert_eq!(result.member_enthusiasm["u1"], 1.0);
    }
}
