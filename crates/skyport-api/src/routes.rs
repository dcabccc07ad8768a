use axum::middleware::from_fn;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::auth::require_account;
use crate::handlers::{acquisition, apps, deployments, releases};
use crate::state::ApiState;

/// The client-facing acquisition surface: `updateCheck` and status
/// reporting, plus their legacy snake_case aliases (spec §4.H, §6, §9).
pub fn acquisition_routes() -> Router<ApiState> {
    Router::new()
        .route("/updateCheck", get(acquisition::update_check))
        .route("/v0.1/public/codepush/update_check", get(acquisition::update_check_legacy))
        .route("/reportStatus/deploy", post(acquisition::report_status_deploy))
        .route(
            "/v0.1/public/codepush/report_status/deploy",
            post(acquisition::report_status_deploy_legacy),
        )
        .route("/reportStatus/download", post(acquisition::report_status_download))
        .route(
            "/v0.1/public/codepush/report_status/download",
            post(acquisition::report_status_download_legacy),
        )
        .route("/health", get(acquisition::health))
}

/// The operator-facing management surface: apps, deployments, releases.
pub fn management_routes() -> Router<ApiState> {
    Router::new()
        .route("/apps", get(apps::list_apps).post(apps::create_app))
        .route(
            "/apps/:appName",
            get(apps::get_app).patch(apps::patch_app).delete(apps::delete_app),
        )
        .route("/apps/:appName/transfer/:email", post(apps::transfer_app))
        .route(
            "/apps/:appName/collaborators",
            get(apps::list_collaborators).post(apps::add_collaborator),
        )
        .route("/apps/:appName/collaborators/:email", delete(apps::remove_collaborator))
        .route(
            "/apps/:appName/deployments",
            get(deployments::list_deployments).post(deployments::create_deployment),
        )
        .route(
            "/apps/:appName/deployments/:deploymentName",
            get(deployments::get_deployment)
                .patch(deployments::patch_deployment)
                .delete(deployments::delete_deployment),
        )
        .route(
            "/apps/:appName/deployments/:deploymentName/history",
            get(deployments::get_history).delete(deployments::clear_history),
        )
        .route("/apps/:appName/deployments/:deploymentName/metrics", get(deployments::get_metrics))
        .route(
            "/apps/:appName/deployments/:deploymentName/release",
            post(releases::upload_release).patch(releases::patch_release),
        )
        .route(
            "/apps/:appName/deployments/:deploymentName/promote/:destinationName",
            post(releases::promote_release),
        )
        .route(
            "/apps/:appName/deployments/:deploymentName/rollback",
            post(releases::rollback_to_previous),
        )
        .route(
            "/apps/:appName/deployments/:deploymentName/rollback/:targetRelease",
            post(releases::rollback_to_label),
        )
        .layer(from_fn(require_account))
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .merge(acquisition_routes())
        .merge(management_routes())
        .with_state(state)
}
