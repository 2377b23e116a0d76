//! The `LocationCache` trait — a short-TTL "latest location" cache.
//!
//! Cache failures must never affect correctness: callers treat any error as a
//! miss and fall through to the store.
//!
//! A read-through fill is guarded by a [`Generation`]: a miss reports the
//! generation it observed, and [`LocationCache::put`] refuses the fill if the
//! subject was invalidated after that observation. A reader that loads a
//! sample from the store while a write is landing can therefore never cache
//! the superseded sample.

use std::{future::Future, sync::Arc};

use chrono::Duration;

use crate::location::LocationRecord;

/// Monotonic invalidation stamp observed on a cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

/// Outcome of [`LocationCache::get`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
  Hit(LocationRecord),
  /// Nothing usable is cached. Hand the generation back to `put`.
  Miss(Generation),
}

pub trait LocationCache: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn get<'a>(
    &'a self,
    subject_id: &'a str,
  ) -> impl Future<Output = Result<Lookup, Self::Error>> + Send + 'a;

  /// Cache `record` for `ttl` unless its subject was invalidated after
  /// `observed`. Returns whether the record was stored.
  fn put<'a>(
    &'a self,
    record: &'a LocationRecord,
    ttl: Duration,
    observed: Generation,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Drop the subject's entry and advance its generation.
  fn invalidate<'a>(
    &'a self,
    subject_id: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

impl<T: LocationCache> LocationCache for Arc<T> {
  type Error = T::Error;

  fn get<'a>(
    &'a self,
    subject_id: &'a str,
  ) -> impl Future<Output = Result<Lookup, Self::Error>> + Send + 'a {
    (**self).get(subject_id)
  }

  fn put<'a>(
    &'a self,
    record: &'a LocationRecord,
    ttl: Duration,
    observed: Generation,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a {
    (**self).put(record, ttl, observed)
  }

  fn invalidate<'a>(
    &'a self,
    subject_id: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
    (**self).invalidate(subject_id)
  }
}
