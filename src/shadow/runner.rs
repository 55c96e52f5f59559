//! Runs a shadow ranking model in parallel with production, logging
//! comparison metrics for offline analysis. Zero overhead when disabled.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use uuid::Uuid;

use crate::db::Db;

#[async_trait]
pub trait ShadowModel: Send + Sync {
    fn model_id(&self) -> &str;
    fn model_version(&self) -> &str;

    /// Return a ranked list of activity node ids for `user_id` among `candidates`.
    async fn predict(&self, user_id: &str, candidates: &[String]) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ShadowResult {
    pub model_id: String,
    pub model_version: String,
    pub shadow_rankings: Vec<String>,
    pub production_rankings: Vec<String>,
    pub overlap_at_5: f64,
    pub ndcg_at_10: f64,
    pub latency_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Fraction of the shadow top-k that also appears in the production top-k.
pub fn compute_overlap_at_k(shadow: &[String], production: &[String], k: usize) -> f64 {
    if shadow.is_empty() || production.is_empty() {
        return 0.0;
    }
    let shadow_top: std::collections::HashSet<&String> = shadow.iter().take(k).collect();
    let prod_top: std::collections::HashSet<&String> = production.iter().take(k).collect();
    if shadow_top.is_empty() {
        return 0.0;
    }
    shadow_top.intersection(&prod_top).count() as f64 / shadow_top.len() as f64
}

/// NDCG@k for the shadow ranking, using position in `production` as ground
/// truth relevance: `rel(item) = max(0, len(production) - position)`.
pub fn compute_ndcg_at_k(shadow: &[String], production: &[String], k: usize) -> f64 {
    if shadow.is_empty() || production.is_empty() {
        return 0.0;
    }

    let prod_len = production.len() as f64;
    let relevance: std::collections::HashMap<&String, f64> = production
        .iter()
        .enumerate()
        .map(|(idx, item)| (item, (prod_len - idx as f64).max(0.0)))
        .collect();

    let dcg: f64 = shadow
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, item)| {
            let rel = relevance.get(item).copied().unwrap_or(0.0);
            rel / (i as f64 + 2.0).log2()
        })
        .sum();

    // Ideal DCG considers every known relevance value, not just the shadow's
    // own top-k, so a weak shadow ranking can't inflate its own ceiling.
    let mut all_rels: Vec<f64> = relevance.values().copied().collect();
    all_rels.sort_by(|a, b| b.partial_cmp(a).unwrap());
    let idcg: f64 = all_rels
        .into_iter()
        .take(k)
        .enumerate()
        .map(|(i, rel)| rel / (i as f64 + 2.0).log2())
        .sum();

    if idcg == 0.0 {
        0.0
    } else {
        dcg / idcg
    }
}

pub struct ShadowRunner {
    db: Db,
    enabled: bool,
    model: Option<Arc<dyn ShadowModel>>,
}

impl ShadowRunner {
    pub fn new(db: Db, enabled: bool, model: Option<Arc<dyn ShadowModel>>) -> Self {
        Self { db, enabled, model }
    }

    /// Run the shadow model and persist a comparison row. Returns `None`
    /// when shadow mode is disabled, no model is configured, or prediction
    /// fails — the caller's ranking path is never affected either way.
    pub async fn run_shadow(
        &self,
        user_id: &str,
        trip_id: &str,
        candidates: &[String],
        production_rankings: &[String],
    ) -> Option<ShadowResult> {
        if !self.enabled && self.model.is_none() {
            return None;
        }

        let Some(model) = self.model.as_ref() else {
            tracing::debug!("no active shadow model configured");
            return None;
        };

        let start = Instant::now();
        let shadow_rankings = match model.predict(user_id, candidates).await {
            Ok(rankings) => rankings,
            Err(err) => {
                tracing::error!(user_id, trip_id, error = %err, "shadow model prediction failed");
                return None;
            }
        };
        let latency_ms = start.elapsed().as_millis() as i64;

        let overlap_at_5 = compute_overlap_at_k(&shadow_rankings, production_rankings, 5);
        let ndcg_at_10 = compute_ndcg_at_k(&shadow_rankings, production_rankings, 10);

        let result = ShadowResult {
            model_id: model.model_id().to_string(),
            model_version: model.model_version().to_string(),
            shadow_rankings,
            production_rankings: production_rankings.to_vec(),
            overlap_at_5,
            ndcg_at_10,
            latency_ms,
            created_at: Utc::now(),
        };

        if let Err(err) = self.store_result(user_id, trip_id, &result) {
            tracing::error!(user_id, trip_id, error = %err, "failed to store shadow result");
        }

        tracing::info!(
            model_id = %result.model_id,
            overlap_at_5,
            ndcg_at_10,
            latency_ms,
            "shadow run complete"
        );

        Some(result)
    }

    fn store_result(&self, user_id: &str, trip_id: &str, result: &ShadowResult) -> anyhow::Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                r#"INSERT INTO shadow_results (
                       id, model_id, model_version, user_id, trip_id,
                       shadow_rankings, production_rankings, overlap_at_5, ndcg_at_10,
                       latency_ms, created_at
                   ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
                params![
                    Uuid::new_v4().to_string(),
                    result.model_id,
                    result.model_version,
                    user_id,
                    trip_id,
                    serde_json::to_string(&result.shadow_rankings)?,
                    serde_json::to_string(&result.production_rankings)?,
                    result.overlap_at_5,
                    result.ndcg_at_10,
                    result.latency_ms,
                    result.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Fire-and-forget: spawns `run_shadow` as a detached task that MUST
    /// NOT delay the caller. The returned handle is for tests only — real
    /// callers drop it.
    pub fn run_shadow_detached(
        self: &Arc<Self>,
        user_id: String,
        trip_id: String,
        candidates: Vec<String>,
        production_rankings: Vec<String>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if !self.enabled && self.model.is_none() {
            return None;
        }

        let runner = Arc::clone(self);
        Some(tokio::spawn(async move {
            runner.run_shadow(&user_id, &trip_id, &candidates, &production_rankings).await;
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn overlap_at_k_counts_intersection() {
        let shadow = ids(&["a", "b", "c"]);
        let production = ids(&["b", "c", "d"]);
        assert_eq!(compute_overlap_at_k(&shadow, &production, 5), 2.0 / 3.0);
    }

    #[test]
    fn overlap_at_k_empty_input_is_zero() {
        assert_eq!(compute_overlap_at_k(&[], &ids(&["a"]), 5), 0.0);
        assert_eq!(compute_overlap_at_k(&ids(&["a"]), &[], 5), 0.0);
    }

    #[test]
    fn ndcg_perfect_match_is_one() {
        let production = ids(&["a", "b", "c"]);
        let shadow = production.clone();
        let ndcg = compute_ndcg_at_k(&shadow, &production, 10);
        assert!((ndcg - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ndcg_zero_idcg_is_zero() {
        let ndcg = compute_ndcg_at_k(&ids(&["a"]), &ids(&["a"]), 0);
        assert_eq!(ndcg, 0.0);
    }

    struct StubModel {
        id: String,
        version: String,
        rankings: Vec<String>,
    }

    #[async_trait]
    impl ShadowModel for StubModel {
        fn model_id(&self) -> &str {
            &self.id
        }
        fn model_version(&self) -> &str {
            &self.version
        }
        async fn predict(&self, _user_id: &str, _candidates: &[String]) -> anyhow::Result<Vec<String>> {
            Ok(self.rankings.clone())
        }
    }

    #[tokio::test]
    async fn disabled_and_no_model_returns_none() {
        let db = Db::open_in_memory().unwrap();
        let runner = ShadowRunner::new(db, false, None);
        let result = runner.run_shadow("u1", "t1", &ids(&["a"]), &ids(&["a"])).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn configured_model_produces_and_stores_a_result() {
        let db = Db::open_in_memory().unwrap();
        let model = Arc::new(StubModel {
            id: "candidate-v2".into(),
            version: "2.0.0".into(),
            rankings: ids(&["a", "b"]),
        });
        let runner = ShadowRunner::new(db, true, Some(model));
        let result = runner
            .run_shadow("u1", "t1", &ids(&["a", "b"]), &ids(&["a", "b"]))
            .await
            .unwrap();

        assert_eq!(result.model_id, "candidate-v2");
        assert_eq!(result.overlap_at_5, 1.0);
    }

    #[tokio::test]
    async fn detached_run_does_not_block_caller() {
        let db = Db::open_in_memory().unwrap();
        let model = Arc::new(StubModel {
            id: "candidate-v2".into(),
            version: "2.0.0".into(),
            rankings: ids(&["a"]),
        });
        let runner = Arc::new(ShadowRunner::new(db, true, Some(model)));
        let handle = runner
            .run_shadow_detached("u1".into(), "t1".into(), ids(&["a"]), ids(&["a"]))
            .expect("shadow mode enabled");
        handle.await.unwrap();
    }
}
