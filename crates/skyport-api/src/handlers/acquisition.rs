use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use skyport_types::{deployment::DeploymentKey, label::Label, update_check::UpdateInfo, MetricKind, StoreError};

use crate::error::ApiError;
use crate::state::ApiState;
use crate::transcode::to_snake_case;

/// Query params for `GET /updateCheck`, matching the wire shape exactly.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CamelUpdateCheckQuery {
    pub deployment_key: String,
    pub app_version: String,
    pub package_hash: Option<String>,
    pub label: Option<String>,
    #[serde(default)]
    pub is_companion: bool,
    pub client_unique_id: Option<String>,
}

/// Same fields, snake_case keys — for `/v0.1/public/codepush/update_check`.
#[derive(Debug, Deserialize)]
pub struct SnakeUpdateCheckQuery {
    pub deployment_key: String,
    pub app_version: String,
    pub package_hash: Option<String>,
    pub label: Option<String>,
    #[serde(default)]
    pub is_companion: bool,
    pub client_unique_id: Option<String>,
}

struct RequestFields {
    deployment_key: String,
    app_version: String,
    package_hash: Option<String>,
    label: Option<String>,
    is_companion: bool,
    client_unique_id: Option<String>,
}

impl From<CamelUpdateCheckQuery> for RequestFields {
    fn from(q: CamelUpdateCheckQuery) -> Self {
        Self {
            deployment_key: q.deployment_key,
            app_version: q.app_version,
            package_hash: q.package_hash,
            label: q.label,
            is_companion: q.is_companion,
            client_unique_id: q.client_unique_id,
        }
    }
}

impl From<SnakeUpdateCheckQuery> for RequestFields {
    fn from(q: SnakeUpdateCheckQuery) -> Self {
        Self {
            deployment_key: q.deployment_key,
            app_version: q.app_version,
            package_hash: q.package_hash,
            label: q.label,
            is_companion: q.is_companion,
            client_unique_id: q.client_unique_id,
        }
    }
}

fn build_request(fields: RequestFields) -> Result<skyport_types::UpdateCheckRequest, ApiError> {
    let label = match fields.label {
        Some(raw) => Some(Label::parse(&raw)?),
        None => None,
    };
    Ok(skyport_types::UpdateCheckRequest {
        deployment_key: DeploymentKey::parse(&fields.deployment_key)?,
        app_version: fields.app_version,
        package_hash: fields.package_hash,
        label,
        is_companion: fields.is_companion,
        client_unique_id: fields.client_unique_id,
    })
}

/// Builds the cache key used for `getCached`/`setCached`: the route path
/// plus every query field except `clientUniqueId`, so two requests that
/// differ only in client identity still hit the same cache entry (spec
/// §4.H "normalise the URL").
fn normalized_cache_url(path: &str, request: &skyport_types::UpdateCheckRequest) -> String {
    format!(
        "{path}?deploymentKey={}&appVersion={}&packageHash={}&label={}&isCompanion={}",
        request.deployment_key,
        request.app_version,
        request.package_hash.as_deref().unwrap_or(""),
        request.label.as_ref().map(Label::as_str).unwrap_or(""),
        request.is_companion,
    )
}

async fn resolve_update_check(
    state: &ApiState,
    request: skyport_types::UpdateCheckRequest,
    cache_path: &str,
) -> Result<UpdateInfo, ApiError> {
    let key_hash = request.deployment_key.hash_hex();
    let cache_url = normalized_cache_url(cache_path, &request);

    let cached = match state.cache.get_cached(&key_hash, &cache_url).await {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "cache read failed for updateCheck; serving from metadata store");
            None
        }
    };

    let (response, from_cache) = match cached {
        Some(r) => (r, true),
        None => {
            let deployment = state.metadata.get_deployment_by_key(&request.deployment_key).await?;
            let history = state.metadata.get_history(deployment.id).await?;
            (skyport_resolver::resolve(history.as_slice(), &request)?, false)
        }
    };

    if !from_cache {
        if let Err(e) = state.cache.set_cached(&key_hash, &cache_url, &response).await {
            tracing::warn!(error = %e, "cache write-back failed for updateCheck");
        }
    }

    let mut info = response.original_package.clone();
    if let (Some(rollout_package), Some(client_id), Some(percent)) =
        (&response.rollout_package, request.client_unique_id.as_deref(), response.rollout)
    {
        let release_tag = rollout_package
            .label
            .as_ref()
            .map(|l| l.as_str().to_string())
            .or_else(|| rollout_package.package_hash.clone())
            .unwrap_or_default();
        if skyport_rollout::is_client_in_rollout(client_id, percent, &release_tag) {
            info = rollout_package.clone();
        }
    }
    info.target_binary_range = Some(info.app_version.clone());
    Ok(info)
}

pub async fn update_check(
    State(state): State<ApiState>,
    Query(query): Query<CamelUpdateCheckQuery>,
) -> Result<Json<Value>, ApiError> {
    let request = build_request(query.into())?;
    let info = resolve_update_check(&state, request, "/updateCheck").await?;
    Ok(Json(json!({ "updateInfo": info })))
}

pub async fn update_check_legacy(
    State(state): State<ApiState>,
    Query(query): Query<SnakeUpdateCheckQuery>,
) -> Result<Json<Value>, ApiError> {
    let request = build_request(query.into())?;
    let info = resolve_update_check(&state, request, "/v0.1/public/codepush/update_check").await?;
    Ok(Json(to_snake_case(json!({ "updateInfo": info }))))
}

/// The SDK version at which the modern `reportStatus/deploy` protocol
/// (label-transition accounting) replaces the legacy lookup-and-patch one
/// (spec §4.H, §9).
fn modern_protocol_threshold() -> semver::Version {
    semver::Version::parse("1.5.2-beta").expect("valid semver literal")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatusDeployBody {
    pub deployment_key: String,
    #[serde(default)]
    pub app_version: Option<String>,
    pub label: Option<String>,
    pub status: Option<String>,
    pub client_unique_id: Option<String>,
    pub previous_deployment_key: Option<String>,
    pub previous_label_or_app_version: Option<String>,
}

async fn report_status_deploy_core(
    state: &ApiState,
    body: ReportStatusDeployBody,
    sdk_version: Option<&str>,
) -> Result<(), ApiError> {
    let deployment_key = DeploymentKey::parse(&body.deployment_key)?;

    let modern = sdk_version
        .and_then(|v| semver::Version::parse(v.trim_start_matches('v')).ok())
        .map(|v| v >= modern_protocol_threshold())
        .unwrap_or(false);

    let Some(label) = body.label.as_deref() else {
        return Ok(());
    };

    if modern {
        match body.status.as_deref() {
            Some("DeploymentFailed") => {
                if let Err(e) = state.cache.increment_label(deployment_key.as_str(), label, MetricKind::DeploymentFailed).await {
                    tracing::warn!(error = %e, "failed to record DeploymentFailed metric");
                }
            }
            Some("DeploymentSucceeded") | None => {
                if let Err(e) = state
                    .cache
                    .increment_label(deployment_key.as_str(), label, MetricKind::DeploymentSucceeded)
                    .await
                {
                    tracing::warn!(error = %e, "failed to record DeploymentSucceeded metric");
                }

                if let Some(client_id) = body.client_unique_id.as_deref() {
                    let prev_key = body
                        .previous_deployment_key
                        .as_deref()
                        .unwrap_or(body.deployment_key.as_str());
                    let swap_result = if prev_key == body.deployment_key {
                        state
                            .cache
                            .update_active_app_for_client(
                                deployment_key.as_str(),
                                client_id,
                                label,
                                body.previous_label_or_app_version.as_deref(),
                            )
                            .await
                    } else {
                        if let Err(e) = state.cache.remove_client_active_label(prev_key, client_id).await {
                            tracing::warn!(error = %e, "failed to purge prior active label across deployments");
                        }
                        state
                            .cache
                            .update_active_app_for_client(deployment_key.as_str(), client_id, label, None)
                            .await
                    };
                    if let Err(e) = swap_result {
                        tracing::warn!(error = %e, "failed to record active-label transition");
                    }
                }
            }
            Some(other) => {
                return Err(ApiError(StoreError::MalformedRequest(format!(
                    "unrecognised status report type '{other}'"
                ))));
            }
        }
        return Ok(());
    }

    // Legacy protocol: only patch counters when the reported label differs
    // from what we already have on file for this client.
    let Some(client_id) = body.client_unique_id.as_deref() else {
        return Ok(());
    };
    let current = state
        .cache
        .get_active_label(deployment_key.as_str(), client_id)
        .await
        .unwrap_or(None);
    if current.as_deref() == Some(label) {
        return Ok(());
    }
    if let Err(e) = state
        .cache
        .update_active_app_for_client(deployment_key.as_str(), client_id, label, current.as_deref())
        .await
    {
        tracing::warn!(error = %e, "failed to record legacy active-label transition");
    }
    Ok(())
}

pub async fn report_status_deploy(
    State(state): State<ApiState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<ReportStatusDeployBody>,
) -> Result<axum::http::StatusCode, ApiError> {
    let sdk_version = headers
        .get("x-codepush-sdk-version")
        .and_then(|v| v.to_str().ok());
    report_status_deploy_core(&state, body, sdk_version).await?;
    Ok(axum::http::StatusCode::OK)
}

pub async fn report_status_deploy_legacy(
    State(state): State<ApiState>,
    headers: axum::http::HeaderMap,
    Json(raw): Json<Value>,
) -> Result<axum::http::StatusCode, ApiError> {
    let camel = crate::transcode::to_camel_case(raw);
    let body: ReportStatusDeployBody =
        serde_json::from_value(camel).map_err(|e| ApiError(StoreError::MalformedRequest(e.to_string())))?;
    let sdk_version = headers
        .get("x-codepush-sdk-version")
        .and_then(|v| v.to_str().ok());
    report_status_deploy_core(&state, body, sdk_version).await?;
    Ok(axum::http::StatusCode::OK)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatusDownloadBody {
    pub deployment_key: String,
    pub label: String,
}

async fn report_status_download_core(state: &ApiState, body: ReportStatusDownloadBody) -> Result<(), ApiError> {
    let deployment_key = DeploymentKey::parse(&body.deployment_key)?;
    let _ = Label::parse(&body.label)?;
    if let Err(e) = state
        .cache
        .increment_label(deployment_key.as_str(), &body.label, MetricKind::Downloaded)
        .await
    {
        tracing::warn!(error = %e, "failed to record Downloaded metric");
    }
    Ok(())
}

pub async fn report_status_download(
    State(state): State<ApiState>,
    Json(body): Json<ReportStatusDownloadBody>,
) -> Result<axum::http::StatusCode, ApiError> {
    report_status_download_core(&state, body).await?;
    Ok(axum::http::StatusCode::OK)
}

pub async fn report_status_download_legacy(
    State(state): State<ApiState>,
    Json(raw): Json<Value>,
) -> Result<axum::http::StatusCode, ApiError> {
    let camel = crate::transcode::to_camel_case(raw);
    let body: ReportStatusDownloadBody =
        serde_json::from_value(camel).map_err(|e| ApiError(StoreError::MalformedRequest(e.to_string())))?;
    report_status_download_core(&state, body).await?;
    Ok(axum::http::StatusCode::OK)
}

/// `GET /health`: healthy iff the metadata store and the cache store both
/// answer (spec §6). The blob store is not on this path — its health probe
/// is a separate, heavier operation (spec §4.B) not suited to a liveness
/// check hit on every load balancer cycle.
pub async fn health(State(state): State<ApiState>) -> Result<&'static str, axum::http::StatusCode> {
    match tokio::try_join!(state.metadata.health_check(), state.cache.health_check()) {
        Ok(_) => Ok("Healthy"),
        Err(_) => Err(axum::http::StatusCode::SERVICE_UNAVAILABLE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyport_blob::LocalBlobStore;
    use skyport_cache::FakeCacheStore;
    use skyport_metadata::FakeMetadataStore;
    use skyport_release::{NoopDiffer, ReleaseIngestor};
    use skyport_types::{ids::AccountId, Email};
    use std::sync::Arc;

    async fn test_state() -> (ApiState, skyport_types::deployment::DeploymentKey) {
        let metadata = Arc::new(FakeMetadataStore::new());
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(LocalBlobStore::new(dir.path().to_path_buf()));
        let cache = Arc::new(FakeCacheStore::new());
        let release = Arc::new(ReleaseIngestor::new(
            metadata.clone(),
            blobs.clone(),
            cache.clone(),
            Arc::new(NoopDiffer),
        ));

        let owner = Email::parse("owner@example.com").unwrap();
        let app = metadata.create_app("demo", owner, AccountId::new()).await.unwrap();
        let deployment = metadata.create_deployment(app.id, "Staging").await.unwrap();
        let key = deployment.key.clone();

        let state = ApiState::new(metadata, blobs, cache, release);
        (state, key)
    }

    #[tokio::test]
    async fn update_check_with_no_history_reports_no_update() {
        let (state, key) = test_state().await;
        let request = skyport_types::UpdateCheckRequest {
            deployment_key: key,
            app_version: "1.0.0".to_string(),
            package_hash: None,
            label: None,
            is_companion: false,
            client_unique_id: None,
        };
        let info = resolve_update_check(&state, request, "/updateCheck").await.unwrap();
        assert!(!info.is_available);
    }

    #[tokio::test]
    async fn report_status_download_increments_counter() {
        let (state, key) = test_state().await;
        report_status_download_core(
            &state,
            ReportStatusDownloadBody {
                deployment_key: key.as_str().to_string(),
                label: "v1".to_string(),
            },
        )
        .await
        .unwrap();

        let metrics = state.cache.get_metrics(key.as_str()).await.unwrap();
        assert_eq!(metrics["v1"].downloaded, 1);
    }

    #[tokio::test]
    async fn legacy_report_status_deploy_only_patches_on_label_change() {
        let (state, key) = test_state().await;
        let body = ReportStatusDeployBody {
            deployment_key: key.as_str().to_string(),
            app_version: None,
            label: Some("v1".to_string()),
            status: None,
            client_unique_id: Some("client-1".to_string()),
            previous_deployment_key: None,
            previous_label_or_app_version: None,
        };
        report_status_deploy_core(&state, body, None).await.unwrap();
        let metrics = state.cache.get_metrics(key.as_str()).await.unwrap();
        assert_eq!(metrics["v1"].active, 1);
    }

    #[tokio::test]
    async fn modern_report_status_deploy_records_installed_and_active() {
        let (state, key) = test_state().await;
        let body = ReportStatusDeployBody {
            deployment_key: key.as_str().to_string(),
            app_version: None,
            label: Some("v1".to_string()),
            status: Some("DeploymentSucceeded".to_string()),
            client_unique_id: Some("client-1".to_string()),
            previous_deployment_key: None,
            previous_label_or_app_version: None,
        };
        report_status_deploy_core(&state, body, Some("2.0.0")).await.unwrap();
        let metrics = state.cache.get_metrics(key.as_str()).await.unwrap();
        assert_eq!(metrics["v1"].installed, 1);
        assert_eq!(metrics["v1"].active, 1);
    }

    #[tokio::test]
    async fn health_reports_ok_when_both_stores_answer() {
        let (state, _key) = test_state().await;
        assert!(health(State(state)).await.is_ok());
    }
}
