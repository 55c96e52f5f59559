//! Post-ranking score floor for cantMiss activity nodes.
//!
//! Applied after persona-based ranking, before final slot assignment.
//! Never re-sorts — the caller decides ordering after this pass runs.

use std::collections::{HashMap, HashSet};

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::Db;

pub const CANT_MISS_SCORE_FLOOR: f64 = 0.72;
pub const ICONIC_VIBE_TAG: &str = "iconic-worth-it";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub id: String,
    pub score: f64,
}

/// Boost any cantMiss candidate whose score is below the floor, in place.
/// Returns the ids that were boosted. Never fails the caller — a query
/// error is logged and the candidates are returned untouched.
pub fn apply_cant_miss_floor(db: &Db, candidates: &mut [RankedCandidate]) -> Vec<String> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
    let cant_miss_ids = match fetch_cant_miss_ids(db, &ids) {
        Ok(ids) => ids,
        Err(err) => {
            tracing::error!(error = %err, "cant_miss_floor: query failed — skipping floor pass");
            return Vec::new();
        }
    };

    if cant_miss_ids.is_empty() {
        return Vec::new();
    }

    let vibe_tags = match fetch_vibe_tags(db, &ids) {
        Ok(tags) => tags,
        Err(err) => {
            tracing::error!(error = %err, "cant_miss_floor: vibe tag lookup failed — proceeding without tags");
            HashMap::new()
        }
    };

    let mut boosted = Vec::new();
    for candidate in candidates.iter_mut() {
        if !cant_miss_ids.contains(&candidate.id) {
            continue;
        }

        let tags = vibe_tags.get(&candidate.id).cloned().unwrap_or_default();
        if !tags.contains(ICONIC_VIBE_TAG) {
            tracing::warn!(
                node = %candidate.id,
                tag = ICONIC_VIBE_TAG,
                vibe_tags = ?tags,
                "cant_miss_floor: node is cantMiss but missing iconic vibe tag — check seeding pipeline"
            );
        }

        if candidate.score < CANT_MISS_SCORE_FLOOR {
            candidate.score = CANT_MISS_SCORE_FLOOR;
            boosted.push(candidate.id.clone());
        }
    }

    if !boosted.is_empty() {
        tracing::info!(count = boosted.len(), ids = ?boosted, "cant_miss_floor applied");
    }

    boosted
}

fn fetch_cant_miss_ids(db: &Db, ids: &[String]) -> anyhow::Result<HashSet<String>> {
    db.with_conn(|conn| {
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id FROM activity_nodes WHERE cant_miss = 1 AND id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let bound: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(bound.as_slice(), |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<HashSet<_>>>()?)
    })
}

fn fetch_vibe_tags(db: &Db, ids: &[String]) -> anyhow::Result<HashMap<String, HashSet<String>>> {
    db.with_conn(|conn| {
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT activity_node_id, slug FROM activity_node_vibe_tags WHERE activity_node_id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let bound: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(bound.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map: HashMap<String, HashSet<String>> = HashMap::new();
        for row in rows {
            let (node_id, slug) = row?;
            map.entry(node_id).or_default().insert(slug);
        }
        Ok(map)
    })
}

/// Admin-only: mark (or unmark) a node as cantMiss. Both seeding criteria —
/// genuinely irreplaceable, still locally endorsed — must be verified by
/// the caller before setting this. Returns `false` if no row matched.
pub fn set_cant_miss(db: &Db, activity_node_id: &str, cant_miss: bool) -> anyhow::Result<bool> {
    db.with_conn_mut(|conn| {
        let updated = conn.execute(
            "UPDATE activity_nodes SET cant_miss = ?1 WHERE id = ?2",
            params![cant_miss as i64, activity_node_id],
        )?;
        Ok(updated > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_node(db: &Db, id: &str, cant_miss: bool) {
        db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO activity_nodes (id, name, category, lat, lon, cant_miss) VALUES (?1, ?1, 'culture', 0.0, 0.0, ?2)",
                params![id, cant_miss as i64],
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn tag(db: &Db, id: &str, slug: &str) {
        db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO activity_node_vibe_tags (activity_node_id, slug) VALUES (?1, ?2)",
                params![id, slug],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn below_floor_score_is_boosted() {
        let db = Db::open_in_memory().unwrap();
        seed_node(&db, "n1", true);
        tag(&db, "n1", ICONIC_VIBE_TAG);

        let mut candidates = vec![RankedCandidate { id: "n1".into(), score: 0.5 }];
        let boosted = apply_cant_miss_floor(&db, &mut candidates);

        assert_eq!(boosted, vec!["n1".to_string()]);
        assert_eq!(candidates[0].score, CANT_MISS_SCORE_FLOOR);
    }

    #[test]
    fn score_above_floor_is_untouched() {
        let db = Db::open_in_memory().unwrap();
        seed_node(&db, "n1", true);
        tag(&db, "n1", ICONIC_VIBE_TAG);

        let mut candidates = vec![RankedCandidate { id: "n1".into(), score: 0.8 }];
        let boosted = apply_cant_miss_floor(&db, &mut candidates);

        assert!(boosted.is_empty());
        assert_eq!(candidates[0].score, 0.8);
    }

    #[test]
    fn non_cant_miss_nodes_are_ignored() {
        let db = Db::open_in_memory().unwrap();
        seed_node(&db, "n1", false);

        let mut candidates = vec![RankedCandidate { id: "n1".into(), score: 0.1 }];
        let boosted = apply_cant_miss_floor(&db, &mut candidates);

        assert!(boosted.is_empty());
        assert_eq!(candidates[0].score, 0.1);
    }

    #[test]
    fn exact_floor_score_is_not_reboosted() {
        let db = Db::open_in_memory().unwrap();
        seed_node(&db, "n1", true);

        let mut candidates = vec![RankedCandidate { id: "n1".into(), score: CANT_MISS_SCORE_FLOOR }];
        let boosted = apply_cant_miss_floor(&db, &mut candidates);
        assert!(boosted.is_empty());
    }

    #[test]
    fn set_cant_miss_updates_flag() {
        let db = Db::open_in_memory().unwrap();
        seed_node(&db, "n1", false);
        assert!(set_cant_miss(&db, "n1", true).unwrap());
        assert!(!set_cant_miss(&db, "missing", true).unwrap());
    }
}
