//! Runtime configuration, deserialised from `config.toml` layered with
//! `HAIL_*` environment variables.

use std::{
  path::{Path, PathBuf},
  time::Duration as StdDuration,
};

use chrono::Duration;
use hail_hub::HubConfig;
use hail_tracker::TrackerConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:         String,
  #[serde(default = "default_port")]
  pub port:         u16,
  #[serde(default = "default_store_path")]
  pub store_path:   PathBuf,
  /// Shared secret for handshake tokens.
  pub token_secret: String,
  #[serde(default)]
  pub hub:          HubConfig,
  #[serde(default)]
  pub tracker:      TrackerSettings,
}

fn default_host() -> String { "127.0.0.1".to_string() }

fn default_port() -> u16 { 8080 }

fn default_store_path() -> PathBuf { PathBuf::from("hail.db") }

impl ServerConfig {
  /// Build from an optional TOML file plus the environment.
  ///
  /// Nested keys use a double underscore, e.g.
  /// `HAIL_HUB__KEEPALIVE__PING_INTERVAL=15`.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("HAIL")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()?
      .try_deserialize()
  }

  pub fn validate(&self) -> Result<(), String> {
    if self.token_secret.trim().is_empty() {
      return Err("token_secret must not be empty".into());
    }
    if self.hub.queue_capacity == 0 {
      return Err("hub.queue_capacity must be positive".into());
    }
    if self.tracker.history_retention_hours.saturating_mul(3_600) > MAX_SECS
      || self.tracker.cache_ttl_secs > MAX_SECS
    {
      return Err("tracker durations must not exceed ten years".into());
    }
    self.hub.keepalive.validate().map_err(|e| e.to_string())
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Tracker tunables in config-friendly units.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
  pub cache_ttl_secs:          u64,
  pub store_timeout_ms:        u64,
  pub cache_timeout_ms:        u64,
  pub history_retention_hours: u64,
  /// How often expired history is pruned.
  pub prune_interval_secs:     u64,
}

impl Default for TrackerSettings {
  fn default() -> Self {
    Self {
      cache_ttl_secs:          600,
      store_timeout_ms:        2_000,
      cache_timeout_ms:        250,
      history_retention_hours: 72,
      prune_interval_secs:     3_600,
    }
  }
}

impl TrackerSettings {
  pub fn tracker_config(&self) -> TrackerConfig {
    TrackerConfig {
      cache_ttl:         seconds(self.cache_ttl_secs),
      store_timeout:     StdDuration::from_millis(self.store_timeout_ms),
      cache_timeout:     StdDuration::from_millis(self.cache_timeout_ms),
      history_retention: seconds(self.history_retention_hours.saturating_mul(3_600)),
    }
  }

  pub fn prune_interval(&self) -> StdDuration {
    StdDuration::from_secs(self.prune_interval_secs.max(1))
  }
}

/// Upper bound for any configured duration.
const MAX_SECS: u64 = 10 * 365 * 24 * 3_600;

fn seconds(secs: u64) -> Duration {
  Duration::try_seconds(secs.min(MAX_SECS) as i64).unwrap_or(Duration::zero())
}

#[cfg(test)]
mod tests {
  use config::{Config, File, FileFormat};
  use hail_hub::ReconnectPolicy;

  use super::*;

  fn parse(toml: &str) -> ServerConfig {
    Config::builder()
      .add_source(File::from_str(toml, FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }

  #[test]
  fn minimal_file_gets_defaults() {
    let cfg = parse(r#"token_secret = "s3cret""#);
    assert_eq!(cfg.address(), "127.0.0.1:8080");
    assert_eq!(cfg.hub.queue_capacity, 256);
    assert_eq!(cfg.hub.reconnect_policy, ReconnectPolicy::Keep);
    assert_eq!(cfg.hub.keepalive.ping_interval, StdDuration::from_secs(30));
    assert_eq!(cfg.tracker.tracker_config().cache_ttl, Duration::minutes(10));
    assert!(cfg.validate().is_ok());
  }

  #[test]
  fn nested_sections_override_defaults() {
    let cfg = parse(
      r#"
        token_secret = "s3cret"
        port = 9000

        [hub]
        queue_capacity = 16
        reconnect_policy = "evict"

        [hub.keepalive]
        ping_interval = 5
        timeout_multiplier = 3

        [tracker]
        store_timeout_ms = 500
      "#,
    );
    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.hub.queue_capacity, 16);
    assert_eq!(cfg.hub.reconnect_policy, ReconnectPolicy::Evict);
    assert_eq!(cfg.hub.keepalive.timeout(), StdDuration::from_secs(15));
    let tracker = cfg.tracker.tracker_config();
    assert_eq!(tracker.store_timeout, StdDuration::from_millis(500));
    assert_eq!(tracker.history_retention, Duration::hours(72));
  }

  #[test]
  fn validation_rejects_bad_settings() {
    let mut cfg = parse(r#"token_secret = " ""#);
    assert!(cfg.validate().is_err());

    cfg.token_secret = "ok".into();
    cfg.hub.keepalive.timeout_multiplier = 1;
    assert!(cfg.validate().is_err());
  }
}
