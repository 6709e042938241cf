//! Reported workload health.

use serde::{Deserialize, Serialize};

use crate::error::{ScenarioError, ScenarioResult};

/// Status kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    /// Nothing reported yet.
    #[default]
    Unknown,
    /// Ready and serving.
    Active,
    /// Needs operator intervention.
    Blocked,
    /// Performing internal work.
    Maintenance,
    /// Waiting on another application.
    Waiting,
    /// Hook failed.
    Error,
}

impl StatusKind {
    /// Name as reported by `status-get`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Maintenance => "maintenance",
            Self::Waiting => "waiting",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StatusKind {
    type Err = ScenarioError;

    fn from_str(s: &str) -> ScenarioResult<Self> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "active" => Ok(Self::Active),
            "blocked" => Ok(Self::Blocked),
            "maintenance" => Ok(Self::Maintenance),
            "waiting" => Ok(Self::Waiting),
            "error" => Ok(Self::Error),
            other => Err(ScenarioError::config(format!("invalid status kind {other:?}"))),
        }
    }
}

/// Application and unit status plus workload version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Application status and message.
    pub app: (StatusKind, String),
    /// Unit status and message.
    pub unit: (StatusKind, String),
    /// Workload version string.
    pub app_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_kind_round_trip_names() {
        for kind in [
            StatusKind::Unknown,
            StatusKind::Active,
            StatusKind::Blocked,
            StatusKind::Maintenance,
            StatusKind::Waiting,
            StatusKind::Error,
        ] {
            assert_eq!(kind.as_str().parse::<StatusKind>().ok(), Some(kind));
        }
    }

    #[test]
    fn test_invalid_status_kind() {
        assert!("bogus".parse::<StatusKind>().is_err());
    }

    #[test]
    fn test_default_status_is_unknown() {
        let status = Status::default();
        assert_eq!(status.unit, (StatusKind::Unknown, String::new()));
        assert!(status.app_version.is_empty());
    }
}
