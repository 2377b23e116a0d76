//! Encoding and decoding helpers between domain types and SQLite columns.
//!
//! Timestamps are stored as integer microseconds so that range predicates
//! and `ORDER BY` compare numerically. Roles are stored as their lowercase
//! names.

use std::str::FromStr as _;

use chrono::{DateTime, Utc};
use hail_core::{Role, geo::Coordinates, location::LocationRecord};

use crate::{Error, Result};

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_ts(dt: DateTime<Utc>) -> i64 { dt.timestamp_micros() }

pub fn decode_ts(micros: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_micros(micros).ok_or(Error::Timestamp(micros))
}

// ─── Role ─────────────────────────────────────────────────────────────────────

pub fn encode_role(role: Role) -> String { role.to_string() }

pub fn decode_role(s: &str) -> Result<Role> {
  Role::from_str(s).map_err(|_| Error::Role(s.to_owned()))
}

// ─── Raw row type ─────────────────────────────────────────────────────────────

/// Column list shared by every `SELECT` that produces a [`RawLocation`].
pub const LATEST_COLUMNS: &str =
  "subject_id, role, lat, lng, ride_id, captured_at, active";

/// History rows are never active; only the latest slot is.
pub const HISTORY_COLUMNS: &str =
  "subject_id, role, lat, lng, ride_id, captured_at, 0";

/// A row read from either location table, before decoding.
pub struct RawLocation {
  pub subject_id:  String,
  pub role:        String,
  pub lat:         f64,
  pub lng:         f64,
  pub ride_id:     Option<String>,
  pub captured_at: i64,
  pub active:      bool,
}

impl RawLocation {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subject_id:  row.get(0)?,
      role:        row.get(1)?,
      lat:         row.get(2)?,
      lng:         row.get(3)?,
      ride_id:     row.get(4)?,
      captured_at: row.get(5)?,
      active:      row.get(6)?,
    })
  }

  pub fn into_record(self) -> Result<LocationRecord> {
    Ok(LocationRecord {
      subject_id:  self.subject_id,
      role:        decode_role(&self.role)?,
      coordinates: Coordinates { lat: self.lat, lng: self.lng },
      ride_id:     self.ride_id,
      captured_at: decode_ts(self.captured_at)?,
      active:      self.active,
    })
  }
}
