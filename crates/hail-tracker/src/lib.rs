//! Location tracker: ingests position samples and answers presence and
//! proximity queries over any [`hail_core::store::LocationStore`], with a
//! short-TTL [`hail_core::cache::LocationCache`] in front of the latest slot.

pub mod cache;
pub mod tracker;

pub use cache::MemoryCache;
pub use tracker::{LocationTracker, PresenceSnapshot, TrackerConfig};
