use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use skyport_types::ids::AccountId;
use skyport_types::{Deployment, LabelMetrics};

use super::{find_app_for_account, require_collaborator, require_owner};
use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Debug, Serialize)]
pub struct DeploymentView {
    pub name: String,
    pub key: String,
}

impl From<Deployment> for DeploymentView {
    fn from(d: Deployment) -> Self {
        DeploymentView { name: d.name, key: d.key.as_str().to_string() }
    }
}

async fn find_deployment(
    state: &ApiState,
    account: &AccountId,
    app_name: &str,
    deployment_name: &str,
) -> Result<(skyport_types::App, Deployment), ApiError> {
    let app = find_app_for_account(state, account, app_name).await?;
    require_collaborator(&app, account)?;
    let deployment = state.metadata.get_deployment(app.id, deployment_name).await?;
    Ok((app, deployment))
}

pub async fn list_deployments(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path(app_name): Path<String>,
) -> Result<Json<Vec<DeploymentView>>, ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    require_collaborator(&app, &account)?;
    let deployments = state.metadata.list_deployments(app.id).await?;
    Ok(Json(deployments.into_iter().map(DeploymentView::from).collect()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentRequest {
    pub name: String,
}

pub async fn create_deployment(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path(app_name): Path<String>,
    Json(body): Json<CreateDeploymentRequest>,
) -> Result<(StatusCode, HeaderMap, Json<DeploymentView>), ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    require_owner(&app, &account)?;

    let deployment = state.metadata.create_deployment(app.id, &body.name).await?;
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!("/apps/{}/deployments/{}", app.name, deployment.name)) {
        headers.insert(axum::http::header::LOCATION, value);
    }
    Ok((StatusCode::CREATED, headers, Json(deployment.into())))
}

pub async fn get_deployment(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path((app_name, deployment_name)): Path<(String, String)>,
) -> Result<Json<DeploymentView>, ApiError> {
    let (_, deployment) = find_deployment(&state, &account, &app_name, &deployment_name).await?;
    Ok(Json(deployment.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchDeploymentRequest {
    pub name: Option<String>,
}

pub async fn patch_deployment(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path((app_name, deployment_name)): Path<(String, String)>,
    Json(body): Json<PatchDeploymentRequest>,
) -> Result<Json<DeploymentView>, ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    require_owner(&app, &account)?;
    let deployment = state.metadata.get_deployment(app.id, &deployment_name).await?;

    let deployment = match body.name {
        Some(new_name) => state.metadata.rename_deployment(deployment.id, &new_name).await?,
        None => deployment,
    };
    Ok(Json(deployment.into()))
}

pub async fn delete_deployment(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path((app_name, deployment_name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    require_owner(&app, &account)?;
    let deployment = state.metadata.get_deployment(app.id, &deployment_name).await?;

    state.metadata.delete_deployment(deployment.id).await?;
    if let Err(e) = state.cache.invalidate(&deployment.key.hash_hex()).await {
        tracing::warn!(error = %e, deployment = %deployment.name, "cache invalidation failed after deployment deletion");
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_history(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path((app_name, deployment_name)): Path<(String, String)>,
) -> Result<Json<Vec<skyport_types::Package>>, ApiError> {
    let (_, deployment) = find_deployment(&state, &account, &app_name, &deployment_name).await?;
    let history = state.metadata.get_history(deployment.id).await?;
    Ok(Json(history.as_slice().to_vec()))
}

pub async fn clear_history(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path((app_name, deployment_name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    require_owner(&app, &account)?;
    let deployment = state.metadata.get_deployment(app.id, &deployment_name).await?;

    state.metadata.clear_history(deployment.id).await?;
    if let Err(e) = state.cache.invalidate(&deployment.key.hash_hex()).await {
        tracing::warn!(error = %e, deployment = %deployment.name, "cache invalidation failed after history clear");
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_metrics(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path((app_name, deployment_name)): Path<(String, String)>,
) -> Result<Json<HashMap<String, LabelMetrics>>, ApiError> {
    let (_, deployment) = find_deployment(&state, &account, &app_name, &deployment_name).await?;
    let metrics = state.cache.get_metrics(deployment.key.as_str()).await?;
    Ok(Json(metrics))
}
