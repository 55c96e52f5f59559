//! Finds approved activity nodes near a transit path between two waypoints.
//!
//! No spatial database extension is available here, so the 200m buffer
//! check is done with a flat equirectangular projection centered on the
//! origin waypoint and a point-to-segment distance in meters. Fine at the
//! scale of a single transit hop; not meant for anything continent-sized.

use std::collections::HashSet;

use anyhow::Result;
use rusqlite::params;
use serde::Serialize;

use crate::db::Db;

pub const TRANSIT_BUFFER_METERS: f64 = 200.0;
pub const MAX_CANDIDATES: usize = 5;
pub const MIN_CONVERGENCE_SCORE: f64 = 0.4;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Serialize)]
pub struct SpatialCandidate {
    pub activity_node_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub category: String,
    pub price_level: Option<i32>,
    pub convergence_score: Option<f64>,
    pub description_short: Option<String>,
    pub primary_image_url: Option<String>,
    pub neighborhood: Option<String>,
    pub duration_minutes: i32,
}

fn category_default_duration(category: &str) -> i32 {
    match category {
        "dining" => 30,
        "drinks" => 20,
        "culture" => 25,
        "outdoors" => 20,
        "active" => 30,
        "entertainment" => 30,
        "shopping" => 20,
        "experience" => 25,
        "nightlife" => 25,
        "wellness" => 20,
        _ => 20,
    }
}

fn estimate_duration(category: &str) -> i32 {
    category_default_duration(category).clamp(15, 30)
}

/// Flat-earth projection onto meters, centered at `(ref_lat, ref_lon)`.
fn to_meters(ref_lat: f64, ref_lon: f64, lat: f64, lon: f64) -> (f64, f64) {
    let ref_lat_rad = ref_lat.to_radians();
    let y = (lat - ref_lat).to_radians() * EARTH_RADIUS_METERS;
    let x = (lon - ref_lon).to_radians() * EARTH_RADIUS_METERS * ref_lat_rad.cos();
    (x, y)
}

fn point_to_segment_distance_m(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let (abx, aby) = (bx - ax, by - ay);
    let len_sq = abx * abx + aby * aby;
    if len_sq < f64::EPSILON {
        return ((px - ax).powi(2) + (py - ay).powi(2)).sqrt();
    }
    let t = (((px - ax) * abx + (py - ay) * aby) / len_sq).clamp(0.0, 1.0);
    let (cx, cy) = (ax + t * abx, ay + t * aby);
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

fn within_transit_buffer(
    origin_lat: f64,
    origin_lon: f64,
    destination_lat: f64,
    destination_lon: f64,
    lat: f64,
    lon: f64,
    buffer_meters: f64,
) -> bool {
    let (ax, ay) = (0.0, 0.0);
    let (bx, by) = to_meters(origin_lat, origin_lon, destination_lat, destination_lon);
    let (px, py) = to_meters(origin_lat, origin_lon, lat, lon);
    point_to_segment_distance_m(px, py, ax, ay, bx, by) <= buffer_meters
}

/// Nodes already scheduled on this trip day, to avoid suggesting a duplicate.
fn already_scheduled_node_ids(db: &Db, trip_id: &str, day_number: i32) -> Result<Vec<String>> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            r#"SELECT activity_node_id FROM itinerary_slots
               WHERE trip_id = ?1 AND day_number = ?2
                 AND activity_node_id IS NOT NULL
                 AND status NOT IN ('skipped', 'completed')"#,
        )?;
        let rows = stmt.query_map(params![trip_id, day_number], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
}

/// Find up to `MAX_CANDIDATES` approved nodes within `TRANSIT_BUFFER_METERS`
/// of the straight-line path from origin to destination, ranked by
/// convergence score descending. Never raises on a query failure — returns
/// an empty list and logs instead, matching the caller's tolerance for a
/// single failed segment.
pub fn find_nodes_along_path(
    db: &Db,
    origin_lat: f64,
    origin_lon: f64,
    destination_lat: f64,
    destination_lon: f64,
    trip_id: &str,
    day_number: i32,
    exclude_node_ids: &[String],
) -> Vec<SpatialCandidate> {
    let mut excluded: HashSet<String> = exclude_node_ids.iter().cloned().collect();
    match already_scheduled_node_ids(db, trip_id, day_number) {
        Ok(ids) => excluded.extend(ids),
        Err(err) => tracing::warn!(error = %err, "failed to fetch already-scheduled nodes"),
    }

    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            r#"SELECT id, name, lat, lon, category, price_level, convergence_score,
                      description_short, primary_image_url, neighborhood
               FROM activity_nodes
               WHERE status = 'approved' AND is_canonical = 1 AND convergence_score >= ?1"#,
        )?;
        let mapped = stmt.query_map(params![MIN_CONVERGENCE_SCORE], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<i32>>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
            ))
        })?;
        Ok(mapped.collect::<rusqlite::Result<Vec<_>>>()?)
    });

    let rows = match rows {
        Ok(rows) => rows,
        Err(err) => {
            tracing::error!(
                origin = ?(origin_lat, origin_lon),
                destination = ?(destination_lat, destination_lon),
                error = %err,
                "spatial query failed"
            );
            return Vec::new();
        }
    };

    let mut candidates: Vec<SpatialCandidate> = rows
        .into_iter()
        .filter(|(id, ..)| !excluded.contains(id))
        .filter(|(_, _, lat, lon, ..)| {
            within_transit_buffer(
                origin_lat,
                origin_lon,
                destination_lat,
                destination_lon,
                *lat,
                *lon,
                TRANSIT_BUFFER_METERS,
            )
        })
        .map(
            |(id, name, lat, lon, category, price_level, convergence_score, description_short, primary_image_url, neighborhood)| {
                let duration_minutes = estimate_duration(&category);
                SpatialCandidate {
                    activity_node_id: id,
                    name,
                    latitude: lat,
                    longitude: lon,
                    duration_minutes,
                    category,
                    price_level,
                    convergence_score: Some(convergence_score),
                    description_short,
                    primary_image_url,
                    neighborhood,
                }
            },
        )
        .collect();

    candidates.sort_by(|a, b| {
        b.convergence_score
            .partial_cmp(&a.convergence_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(MAX_CANDIDATES);

    tracing::info!(
        origin = ?(origin_lat, origin_lon),
        destination = ?(destination_lat, destination_lon),
        buffer_m = TRANSIT_BUFFER_METERS,
        found = candidates.len(),
        "spatial query"
    );

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    fn seed_node(db: &Db, id: &str, lat: f64, lon: f64, category: &str, score: f64) {
        db.with_conn_mut(|conn| {
            conn.execute(
                r#"INSERT INTO activity_nodes (id, name, category, lat, lon, convergence_score, status, is_canonical)
                   VALUES (?1, ?1, ?2, ?3, ?4, ?5, 'approved', 1)"#,
                params![id, category, lat, lon, score],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn on_path_node_within_buffer_is_found() {
        let db = Db::open_in_memory().unwrap();
        // Straight line roughly north along a meridian near the equator.
        seed_node(&db, "near", 0.0005, 0.0, "dining", 0.8);
        seed_node(&db, "far", 5.0, 5.0, "dining", 0.9);

        let candidates = find_nodes_along_path(&db, 0.0, 0.0, 0.001, 0.0, "trip-1", 1, &[]);
        let ids: Vec<_> = candidates.iter().map(|c| c.activity_node_id.clone()).collect();
        assert!(ids.contains(&"near".to_string()));
        assert!(!ids.contains(&"far".to_string()));
    }

    #[test]
    fn low_convergence_nodes_are_excluded() {
        let db = Db::open_in_memory().unwrap();
        seed_node(&db, "weak", 0.0005, 0.0, "dining", 0.1);

        let candidates = find_nodes_along_path(&db, 0.0, 0.0, 0.001, 0.0, "trip-1", 1, &[]);
        assert!(candidates.is_empty());
    }

    #[test]
    fn excluded_ids_are_filtered_out() {
        let db = Db::open_in_memory().unwrap();
        seed_node(&db, "near", 0.0005, 0.0, "dining", 0.8);

        let candidates = find_nodes_along_path(&db, 0.0, 0.0, 0.001, 0.0, "trip-1", 1, &["near".to_string()]);
        assert!(candidates.is_empty());
    }

    #[test]
    fn estimate_duration_clamps_to_range() {
        assert_eq!(estimate_duration("drinks"), 20);
        assert_eq!(estimate_duration("unknown-category"), 20);
    }
}
