use async_trait::async_trait;

use std::collections::HashMap;

use skyport_types::{
    App, Deployment, DeploymentKey, Email, Package, PackageHistory, StoreError,
    ids::{AccountId, AppId, DeploymentId},
    label::Label,
    package::DiffEntry,
};

/// The metadata store gateway (spec §4.A). Implementations must serialise
/// label assignment per deployment: two concurrent `commit_package` calls
/// against the same deployment must not both succeed with the same label.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_app(&self, name: &str, owner: Email, owner_account: AccountId) -> Result<App, StoreError>;
    async fn get_app(&self, app_id: AppId) -> Result<App, StoreError>;
    async fn list_apps_for_account(&self, account: AccountId) -> Result<Vec<App>, StoreError>;
    async fn delete_app(&self, app_id: AppId) -> Result<(), StoreError>;
    async fn rename_app(&self, app_id: AppId, new_name: &str) -> Result<App, StoreError>;
    async fn transfer_app_ownership(&self, app_id: AppId, new_owner: &Email) -> Result<App, StoreError>;
    async fn add_collaborator(&self, app_id: AppId, email: Email, account: AccountId) -> Result<App, StoreError>;
    async fn remove_collaborator(&self, app_id: AppId, email: &Email) -> Result<App, StoreError>;

    async fn create_deployment(&self, app_id: AppId, name: &str) -> Result<Deployment, StoreError>;
    async fn get_deployment(&self, app_id: AppId, name: &str) -> Result<Deployment, StoreError>;
    async fn get_deployment_by_id(&self, deployment_id: DeploymentId) -> Result<Deployment, StoreError>;
    async fn get_deployment_by_key(&self, key: &DeploymentKey) -> Result<Deployment, StoreError>;
    async fn list_deployments(&self, app_id: AppId) -> Result<Vec<Deployment>, StoreError>;
    async fn rename_deployment(&self, deployment_id: DeploymentId, new_name: &str) -> Result<Deployment, StoreError>;
    async fn delete_deployment(&self, deployment_id: DeploymentId) -> Result<(), StoreError>;

    async fn get_history(&self, deployment_id: DeploymentId) -> Result<PackageHistory, StoreError>;
    async fn clear_history(&self, deployment_id: DeploymentId) -> Result<(), StoreError>;

    /// Cheap connectivity probe for `GET /health` (spec §6).
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Appends `package` to the deployment's history, assigning it the
    /// label `package.label` only if that is still the deployment's next
    /// label at commit time (spec §5: per-deployment serialisability).
    /// Implementations retry their own compare-and-set internally; callers
    /// never see a torn write.
    async fn commit_package(&self, deployment_id: DeploymentId, package: Package) -> Result<Package, StoreError>;

    /// Metadata-only edit of an existing package (spec §4.G patch path).
    async fn update_package(
        &self,
        deployment_id: DeploymentId,
        label: &Label,
        patch: PackagePatch,
    ) -> Result<Package, StoreError>;
}

/// Fields the patch path (spec §4.G) is allowed to touch. `rollout`'s
/// monotonicity rule is enforced by the caller before the patch reaches
/// the store.
#[derive(Debug, Clone, Default)]
pub struct PackagePatch {
    pub is_disabled: Option<bool>,
    pub is_mandatory: Option<bool>,
    pub description: Option<String>,
    pub app_version_raw: Option<String>,
    pub rollout: Option<Option<u8>>,
    /// Set by diff post-processing (spec §4.G) once deltas have been
    /// computed and uploaded; `None` here means "leave untouched".
    pub diff_package_map: Option<HashMap<String, DiffEntry>>,
}
