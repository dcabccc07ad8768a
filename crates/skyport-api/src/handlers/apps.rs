use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use skyport_types::ids::AccountId;
use skyport_types::App;

use super::{find_app_for_account, parse_email, require_owner};
use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Debug, Serialize)]
pub struct AppView {
    pub name: String,
    pub collaborators: Vec<CollaboratorView>,
}

#[derive(Debug, Serialize)]
pub struct CollaboratorView {
    pub email: String,
    pub permission: &'static str,
}

impl From<App> for AppView {
    fn from(app: App) -> Self {
        let collaborators = app
            .collaborators
            .iter()
            .map(|(email, c)| CollaboratorView {
                email: email.as_str().to_string(),
                permission: match c.permission {
                    skyport_types::Permission::Owner => "Owner",
                    skyport_types::Permission::Collaborator => "Collaborator",
                },
            })
            .collect();
        AppView { name: app.name, collaborators }
    }
}

pub async fn list_apps(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
) -> Result<Json<Vec<AppView>>, ApiError> {
    let apps = state.metadata.list_apps_for_account(account).await?;
    Ok(Json(apps.into_iter().map(AppView::from).collect()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppRequest {
    pub name: String,
    pub owner_email: String,
}

pub async fn create_app(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Json(body): Json<CreateAppRequest>,
) -> Result<(StatusCode, HeaderMap, Json<AppView>), ApiError> {
    let owner_email = parse_email(&body.owner_email)?;
    let app = state.metadata.create_app(&body.name, owner_email, account).await?;

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!("/apps/{}", app.name)) {
        headers.insert(axum::http::header::LOCATION, value);
    }
    Ok((StatusCode::CREATED, headers, Json(app.into())))
}

pub async fn get_app(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path(app_name): Path<String>,
) -> Result<Json<AppView>, ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    Ok(Json(app.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchAppRequest {
    pub name: Option<String>,
}

pub async fn patch_app(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path(app_name): Path<String>,
    Json(body): Json<PatchAppRequest>,
) -> Result<Json<AppView>, ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    require_owner(&app, &account)?;

    let app = match body.name {
        Some(new_name) => state.metadata.rename_app(app.id, &new_name).await?,
        None => app,
    };
    Ok(Json(app.into()))
}

pub async fn delete_app(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path(app_name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    require_owner(&app, &account)?;

    let deployments = state.metadata.list_deployments(app.id).await?;
    state.metadata.delete_app(app.id).await?;

    // Deleting an app invalidates every deployment-key cache it owned; a
    // failure here must never block the deletion that already succeeded
    // (spec §4.I).
    for deployment in deployments {
        if let Err(e) = state.cache.invalidate(&deployment.key.hash_hex()).await {
            tracing::warn!(error = %e, deployment = %deployment.name, "cache invalidation failed after app deletion");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn transfer_app(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path((app_name, email)): Path<(String, String)>,
) -> Result<Json<AppView>, ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    require_owner(&app, &account)?;
    let new_owner = parse_email(&email)?;

    let app = state.metadata.transfer_app_ownership(app.id, &new_owner).await?;
    Ok(Json(app.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCollaboratorRequest {
    pub email: String,
}

pub async fn add_collaborator(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path(app_name): Path<String>,
    Json(body): Json<AddCollaboratorRequest>,
) -> Result<(StatusCode, Json<AppView>), ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    require_owner(&app, &account)?;
    let email = parse_email(&body.email)?;

    // The new collaborator's own account identity is resolved by the
    // out-of-scope access-key/account layer in production; here it is
    // provisioned fresh so the collaborator map stays well-formed.
    let app = state
        .metadata
        .add_collaborator(app.id, email, skyport_types::AccountId::new())
        .await?;
    Ok((StatusCode::CREATED, Json(app.into())))
}

pub async fn remove_collaborator(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path((app_name, email)): Path<(String, String)>,
) -> Result<Json<AppView>, ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    require_owner(&app, &account)?;
    let email = parse_email(&email)?;

    let app = state.metadata.remove_collaborator(app.id, &email).await?;
    Ok(Json(app.into()))
}

pub async fn list_collaborators(
    State(state): State<ApiState>,
    Extension(account): Extension<AccountId>,
    Path(app_name): Path<String>,
) -> Result<Json<Vec<CollaboratorView>>, ApiError> {
    let app = find_app_for_account(&state, &account, &app_name).await?;
    Ok(Json(AppView::from(app).collaborators))
}
