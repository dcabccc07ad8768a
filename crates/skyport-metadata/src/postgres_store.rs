use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{FromRow, Pool, Postgres, Row};
use uuid::Uuid;

use skyport_types::{
    app::{Collaborator, Permission},
    deployment::DeploymentKey,
    ids::{AccountId, AppId, DeploymentId, PackageId},
    label::Label,
    package::{DiffEntry, ReleaseMethod},
    version_spec::AppVersionSpec,
    App, Deployment, Email, Package, PackageHistory, StoreError,
};

use crate::error::map_sqlx_error;
use crate::store::{MetadataStore, PackagePatch};

/// Postgres-backed [`MetadataStore`]. Label assignment within a single
/// deployment is serialised with `pg_advisory_xact_lock`, scoped to the
/// transaction so the lock is released automatically on commit or
/// rollback (spec §4.A, §5).
pub struct PostgresMetadataStore {
    pool: Pool<Postgres>,
}

impl PostgresMetadataStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct PackageRow {
    id: Uuid,
    label: String,
    app_version_raw: String,
    blob_url: String,
    size: i64,
    package_hash: String,
    manifest_blob_url: Option<String>,
    is_disabled: bool,
    is_mandatory: bool,
    rollout: Option<i16>,
    description: Option<String>,
    release_method: String,
    original_label: Option<String>,
    original_deployment: Option<String>,
    diff_package_map: Option<serde_json::Value>,
    upload_time: chrono::DateTime<chrono::Utc>,
    released_by: String,
}

impl PackageRow {
    fn into_package(self) -> Result<Package, StoreError> {
        let release_method = match self.release_method.as_str() {
            "upload" => ReleaseMethod::Upload,
            "promote" => ReleaseMethod::Promote,
            "rollback" => ReleaseMethod::Rollback,
            other => return Err(StoreError::Other(format!("unknown release_method '{other}' in storage"))),
        };
        let diff_package_map = match self.diff_package_map {
            Some(v) => Some(
                serde_json::from_value::<HashMap<String, DiffEntry>>(v)
                    .map_err(|e| StoreError::Other(format!("corrupt diff_package_map: {e}")))?,
            ),
            None => None,
        };
        Package {
            id: PackageId::from(self.id),
            label: Label::parse(&self.label)?,
            app_version_raw: self.app_version_raw.clone(),
            app_version: None,
            blob_url: self.blob_url,
            size: self.size,
            package_hash: self.package_hash,
            manifest_blob_url: self.manifest_blob_url,
            is_disabled: self.is_disabled,
            is_mandatory: self.is_mandatory,
            rollout: self.rollout.map(|r| r as u8),
            description: self.description,
            release_method,
            original_label: self.original_label.map(|l| Label::parse(&l)).transpose()?,
            original_deployment: self.original_deployment,
            diff_package_map,
            upload_time: self.upload_time,
            released_by: self.released_by,
        }
        .with_parsed_version()
    }
}

fn release_method_str(method: ReleaseMethod) -> &'static str {
    match method {
        ReleaseMethod::Upload => "upload",
        ReleaseMethod::Promote => "promote",
        ReleaseMethod::Rollback => "rollback",
    }
}

/// Postgres's `pg_advisory_xact_lock` takes a 64-bit key; we derive it from
/// the deployment's UUID so concurrent commits to different deployments
/// never contend.
fn advisory_lock_key(deployment_id: DeploymentId) -> i64 {
    let bytes = deployment_id.0.as_bytes();
    i64::from_be_bytes(bytes[0..8].try_into().expect("uuid is 16 bytes"))
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    async fn create_app(&self, name: &str, owner: Email, owner_account: AccountId) -> Result<App, StoreError> {
        let id = AppId::new();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("INSERT INTO apps (id, name) VALUES ($1, $2)")
            .bind(id.0)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        sqlx::query(
            "INSERT INTO app_collaborators (app_id, email, permission, account_id) VALUES ($1, $2, 'owner', $3)",
        )
        .bind(id.0)
        .bind(owner.as_str())
        .bind(owner_account.0)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        self.get_app(id).await
    }

    async fn get_app(&self, app_id: AppId) -> Result<App, StoreError> {
        let name: Option<String> = sqlx::query_scalar("SELECT name FROM apps WHERE id = $1")
            .bind(app_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let name = name.ok_or_else(|| StoreError::NotFound(format!("app {app_id}")))?;

        let rows = sqlx::query("SELECT email, permission, account_id FROM app_collaborators WHERE app_id = $1")
            .bind(app_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut collaborators = HashMap::new();
        for row in rows {
            let email = Email::parse(row.get::<String, _>("email").as_str())?;
            let permission = match row.get::<String, _>("permission").as_str() {
                "owner" => Permission::Owner,
                _ => Permission::Collaborator,
            };
            collaborators.insert(
                email,
                Collaborator {
                    permission,
                    account_id: AccountId::from(row.get::<Uuid, _>("account_id")),
                },
            );
        }

        Ok(App {
            id: app_id,
            name,
            collaborators,
        })
    }

    async fn list_apps_for_account(&self, account: AccountId) -> Result<Vec<App>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT app_id FROM app_collaborators WHERE account_id = $1")
            .bind(account.0)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut apps = Vec::with_capacity(ids.len());
        for id in ids {
            apps.push(self.get_app(AppId::from(id)).await?);
        }
        Ok(apps)
    }

    async fn delete_app(&self, app_id: AppId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM apps WHERE id = $1")
            .bind(app_id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("app {app_id}")));
        }
        Ok(())
    }

    async fn rename_app(&self, app_id: AppId, new_name: &str) -> Result<App, StoreError> {
        let result = sqlx::query("UPDATE apps SET name = $1 WHERE id = $2")
            .bind(new_name)
            .bind(app_id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("app {app_id}")));
        }
        self.get_app(app_id).await
    }

    async fn transfer_app_ownership(&self, app_id: AppId, new_owner: &Email) -> Result<App, StoreError> {
        let mut app = self.get_app(app_id).await?;
        app.transfer_ownership(new_owner)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for (email, collaborator) in &app.collaborators {
            let permission = if collaborator.permission == Permission::Owner {
                "owner"
            } else {
                "collaborator"
            };
            sqlx::query("UPDATE app_collaborators SET permission = $1 WHERE app_id = $2 AND email = $3")
                .bind(permission)
                .bind(app_id.0)
                .bind(email.as_str())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(app)
    }

    async fn add_collaborator(&self, app_id: AppId, email: Email, account: AccountId) -> Result<App, StoreError> {
        sqlx::query(
            "INSERT INTO app_collaborators (app_id, email, permission, account_id) VALUES ($1, $2, 'collaborator', $3)
             ON CONFLICT (app_id, email) DO UPDATE SET account_id = EXCLUDED.account_id",
        )
        .bind(app_id.0)
        .bind(email.as_str())
        .bind(account.0)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        self.get_app(app_id).await
    }

    async fn remove_collaborator(&self, app_id: AppId, email: &Email) -> Result<App, StoreError> {
        let app = self.get_app(app_id).await?;
        if app.owner().map(|(e, _)| e) == Some(email) {
            return Err(StoreError::Forbidden("cannot remove the app owner".to_string()));
        }
        sqlx::query("DELETE FROM app_collaborators WHERE app_id = $1 AND email = $2")
            .bind(app_id.0)
            .bind(email.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        self.get_app(app_id).await
    }

    async fn create_deployment(&self, app_id: AppId, name: &str) -> Result<Deployment, StoreError> {
        let id = DeploymentId::new();
        let key = loop {
            let candidate = format!(
                "{}{}",
                Uuid::new_v4().simple(),
                Uuid::new_v4().simple()
            );
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM deployments WHERE deployment_key = $1)")
                .bind(&candidate)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            if !exists {
                break DeploymentKey::parse(&candidate).expect("generated keys are well-formed");
            }
        };

        sqlx::query(
            "INSERT INTO deployments (id, app_id, name, deployment_key, history_version) VALUES ($1, $2, $3, $4, 0)",
        )
        .bind(id.0)
        .bind(app_id.0)
        .bind(name)
        .bind(key.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(Deployment {
            id,
            app_id,
            name: name.to_string(),
            key,
            current_package_id: None,
            history_version: 0,
        })
    }

    async fn get_deployment(&self, app_id: AppId, name: &str) -> Result<Deployment, StoreError> {
        let row = sqlx::query(
            "SELECT id, app_id, name, deployment_key, current_package_id, history_version
             FROM deployments WHERE app_id = $1 AND name = $2",
        )
        .bind(app_id.0)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| StoreError::NotFound(format!("deployment '{name}'")))?;
        deployment_from_row(row)
    }

    async fn get_deployment_by_id(&self, deployment_id: DeploymentId) -> Result<Deployment, StoreError> {
        let row = sqlx::query(
            "SELECT id, app_id, name, deployment_key, current_package_id, history_version
             FROM deployments WHERE id = $1",
        )
        .bind(deployment_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| StoreError::NotFound(format!("deployment {deployment_id}")))?;
        deployment_from_row(row)
    }

    async fn get_deployment_by_key(&self, key: &DeploymentKey) -> Result<Deployment, StoreError> {
        let row = sqlx::query(
            "SELECT id, app_id, name, deployment_key, current_package_id, history_version
             FROM deployments WHERE deployment_key = $1",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| StoreError::NotFound("deployment key".to_string()))?;
        deployment_from_row(row)
    }

    async fn list_deployments(&self, app_id: AppId) -> Result<Vec<Deployment>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, app_id, name, deployment_key, current_package_id, history_version
             FROM deployments WHERE app_id = $1",
        )
        .bind(app_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(deployment_from_row).collect()
    }

    async fn rename_deployment(&self, deployment_id: DeploymentId, new_name: &str) -> Result<Deployment, StoreError> {
        let result = sqlx::query("UPDATE deployments SET name = $1 WHERE id = $2")
            .bind(new_name)
            .bind(deployment_id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("deployment {deployment_id}")));
        }
        let row = sqlx::query(
            "SELECT id, app_id, name, deployment_key, current_package_id, history_version
             FROM deployments WHERE id = $1",
        )
        .bind(deployment_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        deployment_from_row(row)
    }

    async fn delete_deployment(&self, deployment_id: DeploymentId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM deployments WHERE id = $1")
            .bind(deployment_id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("deployment {deployment_id}")));
        }
        Ok(())
    }

    async fn get_history(&self, deployment_id: DeploymentId) -> Result<PackageHistory, StoreError> {
        let rows: Vec<PackageRow> = sqlx::query_as(
            "SELECT id, label, app_version_raw, blob_url, size, package_hash, manifest_blob_url,
                    is_disabled, is_mandatory, rollout, description, release_method,
                    original_label, original_deployment, diff_package_map, upload_time, released_by
             FROM packages WHERE deployment_id = $1 ORDER BY upload_time ASC",
        )
        .bind(deployment_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let packages = rows
            .into_iter()
            .map(PackageRow::into_package)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PackageHistory::new(packages))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn clear_history(&self, deployment_id: DeploymentId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("DELETE FROM packages WHERE deployment_id = $1")
            .bind(deployment_id.0)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        sqlx::query("UPDATE deployments SET current_package_id = NULL, history_version = history_version + 1 WHERE id = $1")
            .bind(deployment_id.0)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn commit_package(&self, deployment_id: DeploymentId, package: Package) -> Result<Package, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(advisory_lock_key(deployment_id))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let rows: Vec<PackageRow> = sqlx::query_as(
            "SELECT id, label, app_version_raw, blob_url, size, package_hash, manifest_blob_url,
                    is_disabled, is_mandatory, rollout, description, release_method,
                    original_label, original_deployment, diff_package_map, upload_time, released_by
             FROM packages WHERE deployment_id = $1 ORDER BY upload_time ASC",
        )
        .bind(deployment_id.0)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let history = PackageHistory::new(
            rows.into_iter()
                .map(PackageRow::into_package)
                .collect::<Result<Vec<_>, _>>()?,
        );
        history.validate_commit(&package.label)?;

        let diff_package_map_json = package
            .diff_package_map
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Other(format!("could not serialise diff_package_map: {e}")))?;

        sqlx::query(
            "INSERT INTO packages (
                id, deployment_id, label, app_version_raw, blob_url, size, package_hash,
                manifest_blob_url, is_disabled, is_mandatory, rollout, description,
                release_method, original_label, original_deployment, diff_package_map,
                upload_time, released_by
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)",
        )
        .bind(package.id.0)
        .bind(deployment_id.0)
        .bind(package.label.as_str())
        .bind(&package.app_version_raw)
        .bind(&package.blob_url)
        .bind(package.size)
        .bind(&package.package_hash)
        .bind(&package.manifest_blob_url)
        .bind(package.is_disabled)
        .bind(package.is_mandatory)
        .bind(package.rollout.map(|r| r as i16))
        .bind(&package.description)
        .bind(release_method_str(package.release_method))
        .bind(package.original_label.as_ref().map(Label::as_str))
        .bind(&package.original_deployment)
        .bind(diff_package_map_json)
        .bind(package.upload_time)
        .bind(&package.released_by)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            "UPDATE deployments SET current_package_id = $1, history_version = history_version + 1 WHERE id = $2",
        )
        .bind(package.id.0)
        .bind(deployment_id.0)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(package)
    }

    async fn update_package(
        &self,
        deployment_id: DeploymentId,
        label: &Label,
        patch: PackagePatch,
    ) -> Result<Package, StoreError> {
        let history = self.get_history(deployment_id).await?;
        let mut package = history
            .find_by_label(label)
            .cloned()
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
            package.app_version = Some(AppVersionSpec::parse(&v)?);
            package.app_version_raw = v;
        }
        if let Some(v) = patch.rollout {
            package.rollout = v;
        }
        if let Some(v) = patch.diff_package_map {
            package.diff_package_map = Some(v);
        }

        let diff_package_map_json = package
            .diff_package_map
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Other(format!("could not serialise diff_package_map: {e}")))?;

        sqlx::query(
            "UPDATE packages SET is_disabled = $1, is_mandatory = $2, description = $3,
                                 app_version_raw = $4, rollout = $5, diff_package_map = $6
             WHERE deployment_id = $7 AND label = $8",
        )
        .bind(package.is_disabled)
        .bind(package.is_mandatory)
        .bind(&package.description)
        .bind(&package.app_version_raw)
        .bind(package.rollout.map(|r| r as i16))
        .bind(diff_package_map_json)
        .bind(deployment_id.0)
        .bind(label.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(package)
    }
}

fn deployment_from_row(row: sqlx::postgres::PgRow) -> Result<Deployment, StoreError> {
    Ok(Deployment {
        id: DeploymentId::from(row.get::<Uuid, _>("id")),
        app_id: AppId::from(row.get::<Uuid, _>("app_id")),
        name: row.get("name"),
        key: DeploymentKey::parse(row.get::<String, _>("deployment_key").as_str())?,
        current_package_id: row.get::<Option<Uuid>, _>("current_package_id").map(PackageId::from),
        history_version: row.get("history_version"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_lock_key_is_stable_for_the_same_deployment() {
        let id = DeploymentId::new();
        assert_eq!(advisory_lock_key(id), advisory_lock_key(id));
    }

    #[test]
    fn advisory_lock_key_differs_across_deployments() {
        assert_ne!(advisory_lock_key(DeploymentId::new()), advisory_lock_key(DeploymentId::new()));
    }
}
