pub mod acquisition;
pub mod apps;
pub mod deployments;
pub mod releases;

use skyport_types::ids::AccountId;
use skyport_types::{App, Email, Permission, StoreError};

use crate::error::ApiError;
use crate::state::ApiState;

/// Finds the one app under `account` named exactly `name`.
///
/// App resolution by bare name or `owner-email:name` (spec §4.A) is a
/// capability of the out-of-scope CLI front-end; the management surface's
/// routes are already scoped to an authenticated account; see DESIGN.md.
pub(crate) async fn find_app_for_account(
    state: &ApiState,
    account: &AccountId,
    name: &str,
) -> Result<App, ApiError> {
    let apps = state.metadata.list_apps_for_account(*account).await?;
    apps.into_iter()
        .find(|app| app.name == name)
        .ok_or_else(|| ApiError(StoreError::NotFound(format!("app '{name}' not found"))))
}

pub(crate) fn require_owner(app: &App, account: &AccountId) -> Result<(), ApiError> {
    match app.owner() {
        Some((_, collaborator)) if collaborator.account_id == *account => Ok(()),
        _ => Err(ApiError(StoreError::Forbidden("only the app owner may perform this action".to_string()))),
    }
}

pub(crate) fn require_collaborator(app: &App, account: &AccountId) -> Result<(), ApiError> {
    let is_collaborator = app
        .collaborators
        .values()
        .any(|c| c.account_id == *account && matches!(c.permission, Permission::Owner | Permission::Collaborator));
    if is_collaborator {
        Ok(())
    } else {
        Err(ApiError(StoreError::Forbidden("not a collaborator on this app".to_string())))
    }
}

pub(crate) fn parse_email(raw: &str) -> Result<Email, ApiError> {
    Email::parse(raw).map_err(ApiError)
}
