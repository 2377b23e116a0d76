//! Coordinates, rectangles and great-circle distance.
//!
//! All distances in this module are in **meters**, the native unit of the
//! store's proximity query. Kilometer inputs are converted at the tracker
//! boundary with [`km_to_m`].

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

pub fn km_to_m(km: f64) -> f64 { km * 1000.0 }

pub fn m_to_km(m: f64) -> f64 { m / 1000.0 }

// ─── Coordinates ──────────────────────────────────────────────────────────────

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
  pub lat: f64,
  pub lng: f64,
}

impl Coordinates {
  /// Build validated coordinates: lat ∈ [-90, 90], lng ∈ [-180, 180].
  pub fn new(lat: f64, lng: f64) -> Result<Self> {
    let c = Self { lat, lng };
    c.validate()?;
    Ok(c)
  }

  pub fn validate(&self) -> Result<()> {
    let lat_ok = self.lat.is_finite() && (-90.0..=90.0).contains(&self.lat);
    let lng_ok = self.lng.is_finite() && (-180.0..=180.0).contains(&self.lng);
    if lat_ok && lng_ok {
      Ok(())
    } else {
      Err(Error::InvalidCoordinate { lat: self.lat, lng: self.lng })
    }
  }

  /// Great-circle distance to `other` in meters.
  pub fn distance_m(&self, other: &Coordinates) -> f64 {
    let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
    let d_lat = lat2 - lat1;
    let d_lng = (other.lng - self.lng).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
      + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
  }
}

// ─── Bounds ───────────────────────────────────────────────────────────────────

/// An axis-aligned lat/lng rectangle.
///
/// When `south_west.lng > north_east.lng` the rectangle crosses the
/// antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
  pub south_west: Coordinates,
  pub north_east: Coordinates,
}

impl Bounds {
  pub fn new(south_west: Coordinates, north_east: Coordinates) -> Result<Self> {
    south_west.validate()?;
    north_east.validate()?;
    if south_west.lat > north_east.lat {
      return Err(Error::InvalidCoordinate {
        lat: south_west.lat,
        lng: south_west.lng,
      });
    }
    Ok(Self { south_west, north_east })
  }

  /// The smallest rectangle containing every point within `radius_m` of
  /// `center`. Used as an index pre-filter before the exact distance check.
  pub fn around(center: Coordinates, radius_m: f64) -> Self {
    let d_lat = (radius_m / EARTH_RADIUS_M).to_degrees();
    let south = center.lat - d_lat;
    let north = center.lat + d_lat;

    // A circle touching a pole spans every longitude.
    if south <= -90.0 || north >= 90.0 {
      return Self {
        south_west: Coordinates { lat: south.max(-90.0), lng: -180.0 },
        north_east: Coordinates { lat: north.min(90.0), lng: 180.0 },
      };
    }

    let ratio = (radius_m / EARTH_RADIUS_M).sin() / center.lat.to_radians().cos();
    if ratio >= 1.0 {
      return Self {
        south_west: Coordinates { lat: south, lng: -180.0 },
        north_east: Coordinates { lat: north, lng: 180.0 },
      };
    }
    let d_lng = ratio.asin().to_degrees();

    let mut west = center.lng - d_lng;
    let mut east = center.lng + d_lng;
    if west < -180.0 {
      west += 360.0;
    }
    if east > 180.0 {
      east -= 360.0;
    }

    Self {
      south_west: Coordinates { lat: south, lng: west },
      north_east: Coordinates { lat: north, lng: east },
    }
  }

  pub fn crosses_antimeridian(&self) -> bool {
    self.south_west.lng > self.north_east.lng
  }

  pub fn contains(&self, point: &Coordinates) -> bool {
    if point.lat < self.south_west.lat || point.lat > self.north_east.lat {
      return false;
    }
    if self.crosses_antimeridian() {
      point.lng >= self.south_west.lng || point.lng <= self.north_east.lng
    } else {
      point.lng >= self.south_west.lng && point.lng <= self.north_east.lng
    }
  }
}
