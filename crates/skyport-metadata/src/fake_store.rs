use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use skyport_types::{
    app::{Collaborator, Permission},
    deployment::DeploymentKey,
    ids::{AccountId, AppId, DeploymentId},
    label::Label,
    App, Deployment, Email, Package, PackageHistory, StoreError,
};

use crate::store::{MetadataStore, PackagePatch};

struct Inner {
    apps: HashMap<AppId, App>,
    deployments: HashMap<DeploymentId, Deployment>,
    histories: HashMap<DeploymentId, PackageHistory>,
}

/// An in-memory [`MetadataStore`] used by the rest of the workspace's test
/// suites, since spinning up Postgres per unit test is not worth it. Keeps
/// the same invariants as [`crate::postgres_store::PostgresMetadataStore`]
/// by delegating to [`PackageHistory`]'s own validation.
pub struct FakeMetadataStore {
    inner: Mutex<Inner>,
}

impl Default for FakeMetadataStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                apps: HashMap::new(),
                deployments: HashMap::new(),
                histories: HashMap::new(),
            }),
        }
    }
}

impl FakeMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for FakeMetadataStore {
    async fn create_app(&self, name: &str, owner: Email, owner_account: AccountId) -> Result<App, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let app = App {
            id: AppId::new(),
            name: name.to_string(),
            collaborators: HashMap::from([(
                owner,
                Collaborator {
                    permission: Permission::Owner,
                    account_id: owner_account,
                },
            )]),
        };
        inner.apps.insert(app.id, app.clone());
        Ok(app)
    }

    async fn get_app(&self, app_id: AppId) -> Result<App, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .apps
            .get(&app_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("app {app_id}")))
    }

    async fn list_apps_for_account(&self, account: AccountId) -> Result<Vec<App>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .apps
            .values()
            .filter(|a| a.collaborators.values().any(|c| c.account_id == account))
            .cloned()
            .collect())
    }

    async fn delete_app(&self, app_id: AppId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .apps
            .remove(&app_id)
            .ok_or_else(|| StoreError::NotFound(format!("app {app_id}")))?;
        let dead: Vec<DeploymentId> = inner
            .deployments
            .values()
            .filter(|d| d.app_id == app_id)
            .map(|d| d.id)
            .collect();
        for id in dead {
            inner.deployments.remove(&id);
            inner.histories.remove(&id);
        }
        Ok(())
    }

    async fn rename_app(&self, app_id: AppId, new_name: &str) -> Result<App, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let app = inner
            .apps
            .get_mut(&app_id)
            .ok_or_else(|| StoreError::NotFound(format!("app {app_id}")))?;
        app.name = new_name.to_string();
        Ok(app.clone())
    }

    async fn transfer_app_ownership(&self, app_id: AppId, new_owner: &Email) -> Result<App, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let app = inner
            .apps
            .get_mut(&app_id)
            .ok_or_else(|| StoreError::NotFound(format!("app {app_id}")))?;
        app.transfer_ownership(new_owner)?;
        Ok(app.clone())
    }

    async fn add_collaborator(&self, app_id: AppId, email: Email, account: AccountId) -> Result<App, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let app = inner
            .apps
            .get_mut(&app_id)
            .ok_or_else(|| StoreError::NotFound(format!("app {app_id}")))?;
        app.collaborators.insert(
            email,
            Collaborator {
                permission: Permission::Collaborator,
                account_id: account,
            },
        );
        Ok(app.clone())
    }

    async fn remove_collaborator(&self, app_id: AppId, email: &Email) -> Result<App, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let app = inner
            .apps
            .get_mut(&app_id)
            .ok_or_else(|| StoreError::NotFound(format!("app {app_id}")))?;
        if app.owner().map(|(e, _)| e) == Some(email) {
            return Err(StoreError::Forbidden("cannot remove the app owner".to_string()));
        }
        app.collaborators.remove(email);
        Ok(app.clone())
    }

    async fn create_deployment(&self, app_id: AppId, name: &str) -> Result<Deployment, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.apps.contains_key(&app_id) {
            return Err(StoreError::NotFound(format!("app {app_id}")));
        }
        if inner
            .deployments
            .values()
            .any(|d| d.app_id == app_id && d.name == name)
        {
            return Err(StoreError::AlreadyExists(format!(
                "deployment '{name}' already exists on this app"
            )));
        }
        let key = loop {
            let candidate = DeploymentKey::parse(&format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple()))
                .expect("generated deployment keys are always well-formed");
            if !inner.deployments.values().any(|d| d.key == candidate) {
                break candidate;
            }
        };
        let deployment = Deployment {
            id: DeploymentId::new(),
            app_id,
            name: name.to_string(),
            key,
            current_package_id: None,
            history_version: 0,
        };
        inner.deployments.insert(deployment.id, deployment.clone());
        inner.histories.insert(deployment.id, PackageHistory::default());
        Ok(deployment)
    }

    async fn get_deployment(&self, app_id: AppId, name: &str) -> Result<Deployment, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .deployments
            .values()
            .find(|d| d.app_id == app_id && d.name == name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("deployment '{name}'")))
    }

    async fn get_deployment_by_id(&self, deployment_id: DeploymentId) -> Result<Deployment, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .deployments
            .get(&deployment_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("deployment {deployment_id}")))
    }

    async fn get_deployment_by_key(&self, key: &DeploymentKey) -> Result<Deployment, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .deployments
            .values()
            .find(|d| &d.key == key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("deployment key".to_string()))
    }

    async fn list_deployments(&self, app_id: AppId) -> Result<Vec<Deployment>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .deployments
            .values()
            .filter(|d| d.app_id == app_id)
            .cloned()
            .collect())
    }

    async fn rename_deployment(&self, deployment_id: DeploymentId, new_name: &str) -> Result<Deployment, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let deployment = inner
            .deployments
            .get_mut(&deployment_id)
            .ok_or_else(|| StoreError::NotFound(format!("deployment {deployment_id}")))?;
        deployment.name = new_name.to_string();
        Ok(deployment.clone())
    }

    async fn delete_deployment(&self, deployment_id: DeploymentId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .deployments
            .remove(&deployment_id)
            .ok_or_else(|| StoreError::NotFound(format!("deployment {deployment_id}")))?;
        inner.histories.remove(&deployment_id);
        Ok(())
    }

    async fn get_history(&self, deployment_id: DeploymentId) -> Result<PackageHistory, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .histories
            .get(&deployment_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("deployment {deployment_id}")))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn clear_history(&self, deployment_id: DeploymentId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let deployment = inner
            .deployments
            .get_mut(&deployment_id)
            .ok_or_else(|| StoreError::NotFound(format!("deployment {deployment_id}")))?;
        deployment.current_package_id = None;
        deployment.history_version += 1;
        inner.histories.insert(deployment_id, PackageHistory::default());
        Ok(())
    }

    async fn commit_package(&self, deployment_id: DeploymentId, package: Package) -> Result<Package, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let history = inner
            .histories
            .get(&deployment_id)
            .ok_or_else(|| StoreError::NotFound(format!("deployment {deployment_id}")))?
            .clone();
        history.validate_commit(&package.label)?;

        let mut updated = history;
        updated.push_capped(package.clone());
        inner.histories.insert(deployment_id, updated);

        let deployment = inner
            .deployments
            .get_mut(&deployment_id)
            .expect("deployment existed a moment ago");
        deployment.current_package_id = Some(package.id);
        deployment.history_version += 1;

        Ok(package)
    }

    async fn update_package(
        &self,
        deployment_id: DeploymentId,
        label: &Label,
        patch: PackagePatch,
    ) -> Result<Package, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let history = inner
            .histories
            .get_mut(&deployment_id)
            .ok_or_else(|| StoreError::NotFound(format!("deployment {deployment_id}")))?;
        let package = history
            .0
            .iter_mut()
            .find(|p| &p.label == label)
            .ok_or_else(|| StoreError::NotFound(format!("package {label}")))?;

        if let Some(v) = patch.is_disabled {
            package.is_disabled = v;
        }
        if let Some(v) = patch.is_mandatory {
            package.is_mandatory = v;
        }
        if let Some(v) = patch.description {
            package.description = Some(v);
        }
        if let Some(v) = patch.app_version_raw {
            package.app_version = Some(skyport_types::version_spec::AppVersionSpec::parse(&v)?);
            package.app_version_raw = v;
        }
        if let Some(v) = patch.rollout {
            package.rollout = v;
        }
        if let Some(v) = patch.diff_package_map {
            package.diff_package_map = Some(v);
        }
        Ok(package.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn package(label: &str) -> Package {
        Package {
            id: skyport_types::ids::PackageId::new(),
            label: Label::parse(label).unwrap(),
            app_version_raw: "1.0.0".to_string(),
            app_version: Some(skyport_types::version_spec::AppVersionSpec::parse("1.0.0").unwrap()),
            blob_url: "blob://x".to_string(),
            size: 10,
            package_hash: format!("hash-{label}"),
            manifest_blob_url: None,
            is_disabled: false,
            is_mandatory: false,
            rollout: None,
            description: None,
            release_method: skyport_types::package::ReleaseMethod::Upload,
            original_label: None,
            original_deployment: None,
            diff_package_map: None,
            upload_time: Utc::now(),
            released_by: "owner@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn commit_package_assigns_sequential_labels() {
        let store = FakeMetadataStore::new();
        let owner = Email::parse("owner@example.com").unwrap();
        let app = store.create_app("demo", owner, AccountId::new()).await.unwrap();
        let deployment = store.create_deployment(app.id, "Production").await.unwrap();

        let committed = store.commit_package(deployment.id, package("v1")).await.unwrap();
        assert_eq!(committed.label.as_str(), "v1");

        let history = store.get_history(deployment.id).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn commit_package_rejects_out_of_order_labels() {
        let store = FakeMetadataStore::new();
        let owner = Email::parse("owner@example.com").unwrap();
        let app = store.create_app("demo", owner, AccountId::new()).await.unwrap();
        let deployment = store.create_deployment(app.id, "Production").await.unwrap();

        let err = store.commit_package(deployment.id, package("v2")).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn create_deployment_rejects_duplicate_names() {
        let store = FakeMetadataStore::new();
        let owner = Email::parse("owner@example.com").unwrap();
        let app = store.create_app("demo", owner, AccountId::new()).await.unwrap();
        store.create_deployment(app.id, "Production").await.unwrap();
        let err = store.create_deployment(app.id, "Production").await.unwrap_err();
        assert_eq!(err.kind(), "already-exists");
    }
}
