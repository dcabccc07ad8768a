use serde::{Deserialize, Serialize};

use crate::deployment::DeploymentKey;
use crate::label::Label;

/// Request driving the resolver in spec §4.F. `app_version` arrives as the
/// client's raw string; normalisation happens in the resolver, not here.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckRequest {
    pub deployment_key: DeploymentKey,
    pub app_version: String,
    pub package_hash: Option<String>,
    pub label: Option<Label>,
    #[serde(default)]
    pub is_companion: bool,
    pub client_unique_id: Option<String>,
}

/// The resolver's raw output before rollout selection is applied: the
/// package every client with this request would receive, plus an optional
/// rollout candidate and its percentage (spec §4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCheckCacheResponse {
    pub original_package: UpdateInfo,
    pub rollout_package: Option<UpdateInfo>,
    pub rollout: Option<u8>,
}

/// The client-facing update answer (spec §6). Field names match the wire
/// shape exactly; the snake_case transcoder operates on the serialized JSON
/// rather than on a second type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub is_available: bool,
    pub app_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<Label>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_mandatory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_app_version: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_run_binary_version: Option<bool>,
    #[serde(rename = "target_binary_range", skip_serializing_if = "Option::is_none")]
    pub target_binary_range: Option<String>,
}

impl UpdateInfo {
    /// An answer meaning "run whatever binary you already have" (spec §8 S1).
    pub fn no_update(app_version: &str) -> Self {
        Self {
            is_available: false,
            app_version: app_version.to_string(),
            package_hash: None,
            label: None,
            description: None,
            is_mandatory: false,
            download_url: None,
            package_size: None,
            update_app_version: None,
            should_run_binary_version: Some(true),
            target_binary_range: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_update_marks_unavailable_and_run_binary() {
        let info = UpdateInfo::no_update("1.0.0");
        assert!(!info.is_available);
        assert_eq!(info.should_run_binary_version, Some(true));
    }

    #[test]
    fn serializes_without_absent_optional_fields() {
        let info = UpdateInfo::no_update("1.0.0");
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("downloadURL").is_none());
        assert!(json.get("packageHash").is_none());
        assert_eq!(json["isAvailable"], false);
    }
}
