//! Subject roles and the presence policy tied to them.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The role a connected subject plays.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
  Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
  Rider,
  Driver,
  Admin,
  #[default]
  Unassigned,
}

impl Role {
  /// Whether connections with this role auto-join `role:<role>`.
  pub fn has_role_room(self) -> bool { !matches!(self, Self::Unassigned) }

  /// Maximum age of a location sample that still counts as present.
  pub fn freshness_window(self) -> Duration {
    match self {
      Self::Driver => Duration::minutes(15),
      _ => Duration::minutes(30),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::str::FromStr as _;

  use super::*;

  #[test]
  fn parses_lowercase_names() {
    assert_eq!(Role::from_str("driver").unwrap(), Role::Driver);
    assert_eq!(Role::from_str("unassigned").unwrap(), Role::Unassigned);
    assert!(Role::from_str("pilot").is_err());
    assert_eq!(Role::Admin.to_string(), "admin");
  }

  #[test]
  fn driver_freshness_is_shorter() {
    assert_eq!(Role::Driver.freshness_window(), Duration::minutes(15));
    assert_eq!(Role::Rider.freshness_window(), Duration::minutes(30));
  }

  #[test]
  fn unassigned_has_no_role_room() {
    assert!(Role::Driver.has_role_room());
    assert!(!Role::Unassigned.has_role_room());
  }
}
