//! Shared SQLite connection and schema bootstrap.
//!
//! A single connection is shared process-wide behind a mutex, approximating
//! the min=1/max=3 pool contract batch processes expect from the real
//! deployment's Postgres pool.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS behavioral_signals (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    trip_id TEXT NOT NULL,
    activity_node_id TEXT,
    slot_id TEXT,
    signal_type TEXT NOT NULL,
    signal_value REAL NOT NULL,
    trip_phase TEXT NOT NULL,
    raw_action TEXT NOT NULL,
    source TEXT NOT NULL,
    subflow TEXT,
    signal_weight REAL NOT NULL CHECK (signal_weight >= -1.0 AND signal_weight <= 3.0),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_signals_window
    ON behavioral_signals(source, created_at);
CREATE INDEX IF NOT EXISTS idx_signals_node
    ON behavioral_signals(activity_node_id, signal_type);
CREATE INDEX IF NOT EXISTS idx_signals_user_dedup
    ON behavioral_signals(user_id, trip_id, signal_type);

CREATE TABLE IF NOT EXISTS intention_signals (
    id TEXT PRIMARY KEY,
    behavioral_signal_id TEXT NOT NULL,
    intention_type TEXT NOT NULL,
    intention_value TEXT NOT NULL,
    confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
    source TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (behavioral_signal_id, source)
);
CREATE INDEX IF NOT EXISTS idx_intention_signals_signal
    ON intention_signals(behavioral_signal_id);

CREATE TABLE IF NOT EXISTS corpus_ingestion_requests (
    id TEXT PRIMARY KEY,
    raw_place_name TEXT NOT NULL,
    trip_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    source TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS activity_nodes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    category TEXT NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    convergence_score REAL NOT NULL DEFAULT 0,
    tourist_score REAL NOT NULL DEFAULT 0,
    cant_miss INTEGER NOT NULL DEFAULT 0,
    impression_count INTEGER NOT NULL DEFAULT 0,
    acceptance_count INTEGER NOT NULL DEFAULT 0,
    behavioral_quality_score REAL NOT NULL DEFAULT 0.5,
    status TEXT NOT NULL DEFAULT 'approved',
    is_canonical INTEGER NOT NULL DEFAULT 1,
    price_level INTEGER,
    description_short TEXT,
    primary_image_url TEXT,
    neighborhood TEXT
);

CREATE TABLE IF NOT EXISTS activity_node_vibe_tags (
    activity_node_id TEXT NOT NULL,
    slug TEXT NOT NULL,
    PRIMARY KEY (activity_node_id, slug)
);

CREATE TABLE IF NOT EXISTS trips (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    mode TEXT NOT NULL DEFAULT 'solo',
    city TEXT NOT NULL,
    timezone TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'planning'
);
CREATE INDEX IF NOT EXISTS idx_trips_user_status
    ON trips(user_id, status);

CREATE TABLE IF NOT EXISTS itinerary_slots (
    id TEXT PRIMARY KEY,
    trip_id TEXT NOT NULL,
    day_number INTEGER NOT NULL,
    sort_order INTEGER NOT NULL,
    slot_type TEXT NOT NULL,
    status TEXT NOT NULL,
    start_time TEXT,
    end_time TEXT,
    duration_minutes INTEGER,
    is_locked INTEGER NOT NULL DEFAULT 0,
    activity_node_id TEXT,
    UNIQUE (trip_id, day_number, sort_order)
);
CREATE INDEX IF NOT EXISTS idx_slots_trip_day
    ON itinerary_slots(trip_id, day_number, sort_order);

CREATE TABLE IF NOT EXISTS persona_dimensions (
    user_id TEXT NOT NULL,
    dimension TEXT NOT NULL,
    value TEXT NOT NULL,
    confidence REAL NOT NULL,
    source TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, dimension)
);

CREATE TABLE IF NOT EXISTS write_back_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_date TEXT NOT NULL,
    status TEXT NOT NULL,
    rows_updated INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_write_back_success
    ON write_back_runs(run_date) WHERE status = 'success';

CREATE TABLE IF NOT EXISTS persona_update_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_date TEXT NOT NULL,
    status TEXT NOT NULL,
    users_updated INTEGER NOT NULL DEFAULT 0,
    dimensions_updated INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_persona_update_success
    ON persona_update_runs(run_date) WHERE status = 'success';

CREATE TABLE IF NOT EXISTS training_extract_runs (
    id TEXT PRIMARY KEY,
    target_date TEXT NOT NULL,
    status TEXT NOT NULL,
    rows_extracted INTEGER NOT NULL DEFAULT 0,
    file_path TEXT,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS shadow_results (
    id TEXT PRIMARY KEY,
    model_id TEXT NOT NULL,
    model_version TEXT NOT NULL,
    user_id TEXT NOT NULL,
    trip_id TEXT NOT NULL,
    shadow_rankings TEXT NOT NULL,
    production_rankings TEXT NOT NULL,
    overlap_at_5 REAL NOT NULL,
    ndcg_at_10 REAL NOT NULL,
    latency_ms INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS invite_tokens (
    id TEXT PRIMARY KEY,
    token TEXT NOT NULL UNIQUE,
    trip_id TEXT NOT NULL,
    created_by TEXT NOT NULL,
    role TEXT NOT NULL,
    max_uses INTEGER NOT NULL DEFAULT 1,
    used_count INTEGER NOT NULL DEFAULT 0,
    expires_at TEXT NOT NULL,
    revoked_at TEXT,
    created_at TEXT NOT NULL
);
"#;

#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open(database_path: &str) -> Result<Self> {
        let conn = Connection::open(database_path)
            .with_context(|| format!("opening sqlite database at {database_path}"))?;
        conn.execute_batch(SCHEMA_SQL).context("bootstrapping schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory sqlite database")?;
        conn.execute_batch(SCHEMA_SQL).context("bootstrapping schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with exclusive access to the underlying connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` with mutable exclusive access, for callers that need a
    /// transaction (`Connection::transaction`).
    pub fn with_conn_mut<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }
}
