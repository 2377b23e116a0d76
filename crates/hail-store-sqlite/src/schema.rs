//! SQL schema for the hail SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per subject, replaced in place by a keyed upsert.
-- This is the only place a sample can be active.
CREATE TABLE IF NOT EXISTS latest_locations (
    subject_id  TEXT PRIMARY KEY,
    role        TEXT NOT NULL,     -- 'rider' | 'driver' | 'admin' | 'unassigned'
    lat         REAL NOT NULL,
    lng         REAL NOT NULL,
    ride_id     TEXT,
    captured_at INTEGER NOT NULL,  -- microseconds since the Unix epoch
    active      INTEGER NOT NULL DEFAULT 1
);

-- Every sample ever recorded. Append-only apart from retention pruning.
CREATE TABLE IF NOT EXISTS location_history (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id  TEXT NOT NULL,
    role        TEXT NOT NULL,
    lat         REAL NOT NULL,
    lng         REAL NOT NULL,
    ride_id     TEXT,
    captured_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS latest_presence_idx ON latest_locations(role, active, captured_at);
CREATE INDEX IF NOT EXISTS latest_geo_idx      ON latest_locations(lat, lng);
CREATE INDEX IF NOT EXISTS history_subject_idx ON location_history(subject_id, captured_at);
CREATE INDEX IF NOT EXISTS history_ride_idx    ON location_history(ride_id);

PRAGMA user_version = 1;
";
