//! [`SqliteLocationStore`] — the SQLite implementation of [`LocationStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;

use hail_core::{
  Role,
  geo::Bounds,
  location::{LocationRecord, Nearby, ProximityQuery, sort_by_proximity},
  store::LocationStore,
};

use crate::{
  Result,
  encode::{HISTORY_COLUMNS, LATEST_COLUMNS, RawLocation, encode_role, encode_ts},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A location store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteLocationStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteLocationStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run a `SELECT` over [`LATEST_COLUMNS`] / [`HISTORY_COLUMNS`] and decode
  /// every row.
  async fn query_records(
    &self,
    sql: String,
    params: Vec<rusqlite::types::Value>,
  ) -> Result<Vec<LocationRecord>> {
    let raws: Vec<RawLocation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawLocation::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawLocation::into_record).collect()
  }

  /// Active latest records of `role` inside `bounds`, captured at or after
  /// `captured_after`.
  async fn latest_in_bounds(
    &self,
    bounds: Bounds,
    role: Role,
    captured_after: DateTime<Utc>,
  ) -> Result<Vec<LocationRecord>> {
    let lng_clause = if bounds.crosses_antimeridian() {
      "(lng >= ?5 OR lng <= ?6)"
    } else {
      "lng BETWEEN ?5 AND ?6"
    };
    let sql = format!(
      "SELECT {LATEST_COLUMNS} FROM latest_locations
       WHERE role = ?1
         AND active = 1
         AND captured_at >= ?2
         AND lat BETWEEN ?3 AND ?4
         AND {lng_clause}
       ORDER BY captured_at DESC"
    );
    let params = vec![
      encode_role(role).into(),
      encode_ts(captured_after).into(),
      bounds.south_west.lat.into(),
      bounds.north_east.lat.into(),
      bounds.south_west.lng.into(),
      bounds.north_east.lng.into(),
    ];
    self.query_records(sql, params).await
  }

  /// Number of latest-slot rows for a subject; used to check the
  /// one-active-record invariant.
  #[cfg(test)]
  pub(crate) async fn latest_row_count(&self, subject_id: &str) -> Result<i64> {
    let id = subject_id.to_owned();
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(conn.query_row(
            "SELECT COUNT(*) FROM latest_locations WHERE subject_id = ?1 AND active = 1",
            rusqlite::params![id],
            |r| r.get(0),
          )?)
        })
        .await?,
    )
  }
}

// ─── LocationStore impl ──────────────────────────────────────────────────────

impl LocationStore for SqliteLocationStore {
  type Error = crate::Error;

  async fn record(&self, record: &LocationRecord) -> Result<()> {
    let subject_id  = record.subject_id.clone();
    let role        = encode_role(record.role);
    let lat         = record.coordinates.lat;
    let lng         = record.coordinates.lng;
    let ride_id     = record.ride_id.clone();
    let captured_at = encode_ts(record.captured_at);
    let active      = record.active;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        // Keyed replace of the latest slot. An older sample arriving late
        // never overwrites a newer one.
        tx.execute(
          "INSERT INTO latest_locations
             (subject_id, role, lat, lng, ride_id, captured_at, active)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           ON CONFLICT(subject_id) DO UPDATE SET
             role        = excluded.role,
             lat         = excluded.lat,
             lng         = excluded.lng,
             ride_id     = excluded.ride_id,
             captured_at = excluded.captured_at,
             active      = excluded.active
           WHERE excluded.captured_at >= latest_locations.captured_at",
          rusqlite::params![subject_id, role, lat, lng, ride_id, captured_at, active],
        )?;
        tx.execute(
          "INSERT INTO location_history
             (subject_id, role, lat, lng, ride_id, captured_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![subject_id, role, lat, lng, ride_id, captured_at],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn latest(&self, subject_id: &str) -> Result<Option<LocationRecord>> {
    let id = subject_id.to_owned();

    let raw: Option<RawLocation> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {LATEST_COLUMNS} FROM latest_locations WHERE subject_id = ?1"),
              rusqlite::params![id],
              RawLocation::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawLocation::into_record).transpose()
  }

  async fn nearby(&self, query: ProximityQuery) -> Result<Vec<Nearby>> {
    // Rectangle pre-filter on the index, exact great-circle check here.
    let candidates = self
      .latest_in_bounds(
        Bounds::around(query.center, query.radius_m),
        query.role,
        query.captured_after,
      )
      .await?;

    let mut hits: Vec<Nearby> = candidates
      .into_iter()
      .filter_map(|record| {
        let distance_m = query.center.distance_m(&record.coordinates);
        (distance_m <= query.radius_m).then_some(Nearby { record, distance_m })
      })
      .collect();

    sort_by_proximity(&mut hits);
    Ok(hits)
  }

  async fn in_bounds(
    &self,
    bounds: Bounds,
    role: Role,
    captured_after: DateTime<Utc>,
  ) -> Result<Vec<LocationRecord>> {
    self.latest_in_bounds(bounds, role, captured_after).await
  }

  async fn ride_track(&self, ride_id: &str) -> Result<Vec<LocationRecord>> {
    let sql = format!(
      "SELECT {HISTORY_COLUMNS} FROM location_history
       WHERE ride_id = ?1
       ORDER BY captured_at ASC, seq ASC"
    );
    self.query_records(sql, vec![ride_id.to_owned().into()]).await
  }

  async fn subject_history(
    &self,
    subject_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<LocationRecord>> {
    let sql = format!(
      "SELECT {HISTORY_COLUMNS} FROM location_history
       WHERE subject_id = ?1 AND captured_at BETWEEN ?2 AND ?3
       ORDER BY captured_at ASC, seq ASC"
    );
    let params = vec![
      subject_id.to_owned().into(),
      encode_ts(from).into(),
      encode_ts(to).into(),
    ];
    self.query_records(sql, params).await
  }

  async fn deactivate(&self, subject_id: &str) -> Result<bool> {
    let id = subject_id.to_owned();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE latest_locations SET active = 0 WHERE subject_id = ?1",
          rusqlite::params![id],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn prune_history(&self, before: DateTime<Utc>) -> Result<u64> {
    let cutoff = encode_ts(before);
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM location_history WHERE captured_at < ?1",
          rusqlite::params![cutoff],
        )?)
      })
      .await?;
    Ok(removed as u64)
  }
}
