use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StoreError;

/// The four counters the cache/metrics gateway tracks per
/// `(deployment, label)` pair (spec §4.C, §6 reportStatus endpoints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    Downloaded,
    DeploymentSucceeded,
    DeploymentFailed,
    Active,
}

impl MetricKind {
    /// The hash field name used by the Redis-backed gateway, matching the
    /// wire vocabulary reportStatus callers send (spec §6).
    pub fn field_name(self) -> &'static str {
        match self {
            MetricKind::Downloaded => "downloaded",
            MetricKind::DeploymentSucceeded => "installed",
            MetricKind::DeploymentFailed => "failed",
            MetricKind::Active => "active",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "DeploymentSucceeded" => Ok(MetricKind::DeploymentSucceeded),
            "DeploymentFailed" => Ok(MetricKind::DeploymentFailed),
            other => Err(StoreError::MalformedRequest(format!(
                "unrecognised status report type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// The four rolling counters for a single `(deployment, label)` pair,
/// as returned by the management surface's metrics endpoint (spec §6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelMetrics {
    pub active: i64,
    pub downloaded: i64,
    pub installed: i64,
    pub failed: i64,
}

impl LabelMetrics {
    pub fn set_field(&mut self, field: &str, value: i64) {
        match field {
            "active" => self.active = value,
            "downloaded" => self.downloaded = value,
            "installed" => self.installed = value,
            "failed" => self.failed = value,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_match_wire_vocabulary() {
        assert_eq!(MetricKind::Downloaded.field_name(), "downloaded");
        assert_eq!(MetricKind::DeploymentSucceeded.field_name(), "installed");
        assert_eq!(MetricKind::DeploymentFailed.field_name(), "failed");
        assert_eq!(MetricKind::Active.field_name(), "active");
    }

    #[test]
    fn parse_rejects_unknown_status() {
        assert!(MetricKind::parse("DeploymentUnknown").is_err());
    }
}
