use axum::extract::{Extension, Multipart, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::Json;
use serde::Deserialize;

use skyport_types::ids::AccountId;
use skyport_types::{label::Label, Package, StoreError};

use super::{find_app_for_account, require_collaborator};
use crate::error::ApiError;
use crate::state::ApiState;

fn malformed(text: impl std::fmt::Display) -> ApiError {
    ApiError(StoreError::MalformedRequest(text.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageInfo {
    app_version: String,
    #[serde(default)]
    is_mandatory: bool,
    #[serde(default)]
    rollout: Option<u8>,
    #[serde(default)]
    description: Option<String>,
}

/// `POST .../release` — multipart with a `package` file field and a
/// `packageInfo` JSON field (spec §6). Rate-limiting for this route is
/// ambient, enforced by a tower layer in `skyport-server`, not here.
pub async fn upload_release(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path((app_name, deployment_name)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Result<(StatusCode, HeaderMap, Json<Package>), ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    require_collaborator(&app, &account)?;
    let deployment = state.metadata.get_deployment(app.id, &deployment_name).await?;

    let mut payload: Option<Vec<u8>> = None;
    let mut info: Option<PackageInfo> = None;

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        match field.name() {
            Some("package") => {
                let bytes = field.bytes().await.map_err(malformed)?;
                payload = Some(bytes.to_vec());
            }
            Some("packageInfo") => {
                let text = field.text().await.map_err(malformed)?;
                info = Some(serde_json::from_str(&text).map_err(malformed)?);
            }
            _ => {}
        }
    }

    let payload = payload.ok_or_else(|| malformed("multipart request is missing the 'package' field"))?;
    let info = info.ok_or_else(|| malformed("multipart request is missing the 'packageInfo' field"))?;

    let package = state
        .release
        .upload(skyport_release::UploadRequest {
            deployment_id: deployment.id,
            payload,
            app_version_raw: info.app_version,
            is_mandatory: info.is_mandatory,
            rollout: info.rollout,
            description: info.description,
            released_by: account.to_string(),
        })
        .await?;

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!(
        "/apps/{}/deployments/{}/history",
        app.name, deployment.name
    )) {
        headers.insert(axum::http::header::LOCATION, value);
    }
    Ok((StatusCode::CREATED, headers, Json(package)))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PatchPackageInfo {
    label: Option<String>,
    is_disabled: Option<bool>,
    is_mandatory: Option<bool>,
    description: Option<String>,
    app_version: Option<String>,
    rollout: Option<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatchReleaseBody {
    #[serde(default)]
    package_info: PatchPackageInfo,
}

pub async fn patch_release(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path((app_name, deployment_name)): Path<(String, String)>,
    Json(body): Json<PatchReleaseBody>,
) -> Result<Json<Package>, ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    require_collaborator(&app, &account)?;
    let deployment = state.metadata.get_deployment(app.id, &deployment_name).await?;

    let label = match body.package_info.label {
        Some(raw) => Some(Label::parse(&raw)?),
        None => None,
    };

    let updated = state
        .release
        .patch(skyport_release::PatchRequest {
            deployment_id: deployment.id,
            label,
            is_disabled: body.package_info.is_disabled,
            is_mandatory: body.package_info.is_mandatory,
            description: body.package_info.description,
            app_version_raw: body.package_info.app_version,
            rollout: body.package_info.rollout.map(Some),
        })
        .await?;
    Ok(Json(updated))
}

pub async fn promote_release(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path((app_name, source_name, destination_name)): Path<(String, String, String)>,
    Json(body): Json<PatchReleaseBody>,
) -> Result<Json<Package>, ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    require_collaborator(&app, &account)?;
    let source = state.metadata.get_deployment(app.id, &source_name).await?;
    let destination = state.metadata.get_deployment(app.id, &destination_name).await?;

    let info = body.package_info;
    let label = match info.label {
        Some(raw) => Some(Label::parse(&raw)?),
        None => None,
    };

    let promoted = state
        .release
        .promote(skyport_release::PromoteRequest {
            source_deployment_id: source.id,
            destination_deployment_id: destination.id,
            label,
            overrides: skyport_release::ReleaseOverrides {
                is_disabled: info.is_disabled,
                is_mandatory: info.is_mandatory,
                description: info.description,
                rollout: info.rollout,
            },
            released_by: account.to_string(),
        })
        .await?;
    Ok(Json(promoted))
}

async fn rollback_core(
    state: &ApiState,
    account: &AccountId,
    app_name: &str,
    deployment_name: &str,
    target_release: Option<&str>,
) -> Result<Package, ApiError> {
    let app = find_app_for_account(state, account, app_name).await?;
    require_collaborator(&app, account)?;
    let deployment = state.metadata.get_deployment(app.id, deployment_name).await?;

    let target_label = match target_release {
        Some(raw) => Some(Label::parse(raw)?),
        None => None,
    };

    state
        .release
        .rollback(skyport_release::RollbackRequest {
            deployment_id: deployment.id,
            target_label,
            released_by: account.to_string(),
        })
        .await
        .map_err(ApiError)
}

pub async fn rollback_to_previous(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path((app_name, deployment_name)): Path<(String, String)>,
) -> Result<Json<Package>, ApiError> {
    let rolled_back = rollback_core(&state, &account, &app_name, &deployment_name, None).await?;
    Ok(Json(rolled_back))
}

pub async fn rollback_to_label(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path((app_name, deployment_name, target_release)): Path<(String, String, String)>,
) -> Result<Json<Package>, ApiError> {
    let rolled_back = rollback_core(&state, &account, &app_name, &deployment_name, Some(&target_release)).await?;
    Ok(Json(rolled_back))
}
