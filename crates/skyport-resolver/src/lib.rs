//! The update resolver (spec §4.F): a pure function mapping a deployment's
//! package history and a client's request onto an update answer. No I/O, no
//! clock reads — every input arrives as an argument.

use semver::Version;

use skyport_types::{
    update_check::{UpdateCheckCacheResponse, UpdateCheckRequest, UpdateInfo},
    version_spec::normalize_client_version,
    AppVersionSpec, Package, StoreError,
};

/// Resolves a request against `history` (oldest-first, as stored) and
/// returns the cache-ready answer. Runs the inner routine twice — once
/// allowing unfinished rollouts as candidates, once ignoring them — per
/// spec §4.F's "core algorithm".
pub fn resolve(history: &[Package], request: &UpdateCheckRequest) -> Result<UpdateCheckCacheResponse, StoreError> {
    if request.app_version.trim().is_empty() {
        return Err(StoreError::MalformedRequest("appVersion is required".to_string()));
    }
    let normalized = normalize_client_version(&request.app_version);
    let client_version = Version::parse(&normalized)
        .map_err(|e| StoreError::MalformedRequest(format!("invalid appVersion '{}': {e}", request.app_version)))?;

    let allow_rollout = resolve_inner(history, request, &client_version, true);
    let ignore_rollout = resolve_inner(history, request, &client_version, false);

    let allow_info = restore_original_version(allow_rollout.info, &request.app_version, &normalized);
    let ignore_info = restore_original_version(ignore_rollout.info, &request.app_version, &normalized);
    let matched_rollout = allow_rollout.matched_rollout;

    if allow_info.is_available && matched_rollout.is_some() {
        Ok(UpdateCheckCacheResponse {
            original_package: ignore_info,
            rollout_package: Some(allow_info),
            rollout: matched_rollout,
        })
    } else {
        Ok(UpdateCheckCacheResponse {
            original_package: ignore_info,
            rollout_package: None,
            rollout: None,
        })
    }
}

/// If the chosen package's `appVersion` equals the normalised request
/// version, rewrite the echoed version back to the client's original
/// string (spec §4.F "AppVersion normalisation").
fn restore_original_version(mut info: UpdateInfo, original: &str, normalized: &str) -> UpdateInfo {
    if info.app_version == normalized {
        info.app_version = original.to_string();
    }
    info
}

struct InnerResult {
    info: UpdateInfo,
    /// `Some(percent)` when the winning candidate is an unfinished rollout.
    matched_rollout: Option<u8>,
}

fn resolve_inner(
    history: &[Package],
    request: &UpdateCheckRequest,
    client_version: &Version,
    allow_rollout: bool,
) -> InnerResult {
    let mut found_request_package_in_history = false;
    let mut latest_enabled_package: Option<&Package> = None;
    let mut latest_satisfying_enabled_package: Option<&Package> = None;
    let mut should_make_update_mandatory = false;

    for entry in history.iter().rev() {
        let matches_current = if let Some(label) = &request.label {
            &entry.label == label
        } else if let Some(hash) = &request.package_hash {
            &entry.package_hash == hash
        } else {
            true
        };
        if matches_current {
            found_request_package_in_history = true;
        }

        if entry.is_disabled || (!allow_rollout && entry.is_unfinished_rollout()) {
            continue;
        }

        if latest_enabled_package.is_none() {
            latest_enabled_package = Some(entry);
        }

        if !request.is_companion && !entry.app_version().satisfies(client_version) {
            continue;
        }

        if latest_satisfying_enabled_package.is_none() {
            latest_satisfying_enabled_package = Some(entry);
        }

        if found_request_package_in_history {
            break;
        }
        if entry.is_mandatory {
            should_make_update_mandatory = true;
            break;
        }
    }

    let normalized = normalize_client_version(&request.app_version);

    let Some(latest_enabled) = latest_enabled_package else {
        return InnerResult {
            info: UpdateInfo::no_update(&normalized),
            matched_rollout: None,
        };
    };

    let hash_matches_request = |winner: &Package| {
        request
            .package_hash
            .as_deref()
            .is_some_and(|h| h == winner.package_hash)
    };

    match latest_satisfying_enabled_package {
        None => InnerResult {
            info: no_bundle_update(&normalized, client_version, latest_enabled, true),
            matched_rollout: None,
        },
        Some(winner) if hash_matches_request(winner) => InnerResult {
            info: no_bundle_update(&normalized, client_version, latest_enabled, false),
            matched_rollout: None,
        },
        Some(winner) => {
            let (download_url, package_size) = match &request.package_hash {
                Some(hash) => match winner.diff_package_map.as_ref().and_then(|m| m.get(hash)) {
                    Some(diff) => (diff.blob_url.clone(), diff.size),
                    None => (winner.blob_url.clone(), winner.size),
                },
                None => (winner.blob_url.clone(), winner.size),
            };

            let info = UpdateInfo {
                is_available: true,
                app_version: request.app_version.clone(),
                package_hash: Some(winner.package_hash.clone()),
                label: Some(winner.label.clone()),
                description: winner.description.clone(),
                is_mandatory: should_make_update_mandatory || winner.is_mandatory,
                download_url: Some(download_url),
                package_size: Some(package_size),
                update_app_version: None,
                should_run_binary_version: Some(false),
                target_binary_range: None,
            };
            let matched_rollout = if winner.is_unfinished_rollout() {
                Some(winner.effective_rollout())
            } else {
                None
            };
            InnerResult { info, matched_rollout }
        }
    }
}

/// Builds the "no bundle update" answer, applying the
/// appVersion-vs-latestEnabledPackage comparison from spec §4.F.
fn no_bundle_update(
    normalized_request_version: &str,
    client_version: &Version,
    latest_enabled: &Package,
    should_run_binary_version: bool,
) -> UpdateInfo {
    let mut info = UpdateInfo::no_update(normalized_request_version);
    info.should_run_binary_version = Some(should_run_binary_version);

    if latest_enabled.app_version().version_exceeds(client_version) {
        info.app_version = latest_enabled.app_version().canonical();
        if !latest_enabled.app_version().satisfies(client_version) {
            info.update_app_version = Some(true);
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use skyport_types::{
        deployment::DeploymentKey, ids::PackageId, package::DiffEntry, package::ReleaseMethod, Label,
    };
    use std::collections::HashMap;

    fn package(
        label: &str,
        app_version: &str,
        hash: &str,
        blob_url: &str,
        size: i64,
        mandatory: bool,
        disabled: bool,
        rollout: Option<u8>,
    ) -> Package {
        Package {
            id: PackageId::new(),
            label: Label::parse(label).unwrap(),
            app_version_raw: app_version.to_string(),
            app_version: Some(AppVersionSpec::parse(app_version).unwrap()),
            blob_url: blob_url.to_string(),
            size,
            package_hash: hash.to_string(),
            manifest_blob_url: None,
            is_disabled: disabled,
            is_mandatory: mandatory,
            rollout,
            description: None,
            release_method: ReleaseMethod::Upload,
            original_label: None,
            original_deployment: None,
            diff_package_map: None,
            upload_time: Utc::now(),
            released_by: "owner@example.com".to_string(),
        }
    }

    fn request(app_version: &str, package_hash: Option<&str>, label: Option<&str>) -> UpdateCheckRequest {
        UpdateCheckRequest {
            deployment_key: DeploymentKey::parse(&"k".repeat(10)).unwrap(),
            app_version: app_version.to_string(),
            package_hash: package_hash.map(str::to_string),
            label: label.map(|l| Label::parse(l).unwrap()),
            is_companion: false,
            client_unique_id: None,
        }
    }

    #[test]
    fn s1_first_client_no_history() {
        let response = resolve(&[], &request("1.0.0", None, None)).unwrap();
        assert!(!response.original_package.is_available);
        assert_eq!(response.original_package.should_run_binary_version, Some(true));
        assert!(response.rollout_package.is_none());
    }

    #[test]
    fn s2_available_update() {
        let history = vec![package("v1", "1.0.0", "H1", "U1", 100, false, false, None)];
        let response = resolve(&history, &request("1.0.0", Some("H0"), None)).unwrap();
        let info = response.original_package;
        assert!(info.is_available);
        assert_eq!(info.label.unwrap().as_str(), "v1");
        assert_eq!(info.download_url.as_deref(), Some("U1"));
        assert_eq!(info.package_size, Some(100));
        assert!(!info.is_mandatory);
        assert_eq!(info.app_version, "1.0.0");
    }

    #[test]
    fn s3_mandatory_propagates_across_skipped_releases() {
        let history = vec![
            package("v1", "1.0.0", "H1", "U1", 10, false, false, None),
            package("v2", "1.0.0", "H2", "U2", 20, true, false, None),
            package("v3", "1.0.0", "H3", "U3", 30, false, false, None),
        ];
        let response = resolve(&history, &request("1.0.0", Some("H1"), None)).unwrap();
        let info = response.original_package;
        assert_eq!(info.label.unwrap().as_str(), "v3");
        assert!(info.is_mandatory);
    }

    #[test]
    fn s5_diff_url_selection() {
        let mut head = package("v2", "1.0.0", "H2", "U2", 200, false, false, None);
        head.diff_package_map = Some(HashMap::from([(
            "H1".to_string(),
            DiffEntry {
                size: 10,
                blob_url: "D.url".to_string(),
            },
        )]));
        let history = vec![package("v1", "1.0.0", "H1", "U1", 10, false, false, None), head];

        let with_diff = resolve(&history, &request("1.0.0", Some("H1"), None)).unwrap();
        let info = with_diff.original_package;
        assert_eq!(info.download_url.as_deref(), Some("D.url"));
        assert_eq!(info.package_size, Some(10));

        let without_diff = resolve(&history, &request("1.0.0", Some("H_other"), None)).unwrap();
        let info2 = without_diff.original_package;
        assert_eq!(info2.download_url.as_deref(), Some("U2"));
        assert_eq!(info2.package_size, Some(200));
    }

    #[test]
    fn unfinished_rollout_is_split_into_rollout_and_original_packages() {
        let history = vec![package(
            "v1", "1.0.0", "H1", "U1", 10, false, false, Some(40),
        )];
        let response = resolve(&history, &request("1.0.0", Some("H0"), None)).unwrap();
        assert!(response.rollout_package.is_some());
        assert_eq!(response.rollout, Some(40));
        assert!(!response.original_package.is_available);
    }

    #[test]
    fn version_round_trips_for_non_semver_client_strings() {
        for raw in ["1", "2.0", "2.0-beta", "1.2.3"] {
            let history: Vec<Package> = vec![];
            let response = resolve(&history, &request(raw, None, None)).unwrap();
            assert_eq!(response.original_package.app_version, raw);
        }
    }

    #[test]
    fn rejects_non_semver_app_version() {
        let err = resolve(&[], &request("not-a-version", None, None)).unwrap_err();
        assert_eq!(err.kind(), "malformed-request");
    }
}
