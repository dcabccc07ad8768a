use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use skyport_blob::BlobStore;
use skyport_cache::CacheStore;
use skyport_metadata::{MetadataStore, PackagePatch};
use skyport_types::{
    ids::{DeploymentId, PackageId},
    label::Label,
    package::{DiffEntry, ReleaseMethod},
    version_spec::AppVersionSpec,
    Package, StoreError,
};

use crate::differ::Differ;
use crate::pipeline::UploadPipeline;

fn validate_rollout(rollout: Option<u8>) -> Result<(), StoreError> {
    match rollout {
        Some(r) if !(1..=100).contains(&r) => {
            Err(StoreError::MalformedRequest("rollout must be between 1 and 100".to_string()))
        }
        _ => Ok(()),
    }
}

/// Orchestrates [`skyport_hash`], [`skyport_metadata`] and [`skyport_blob`]
/// for the upload/promote/rollback/patch paths of spec §4.G.
pub struct ReleaseIngestor {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    cache: Arc<dyn CacheStore>,
    differ: Arc<dyn Differ>,
    max_diff_releases: usize,
}

pub struct UploadRequest {
    pub deployment_id: DeploymentId,
    pub payload: Vec<u8>,
    pub app_version_raw: String,
    pub is_mandatory: bool,
    pub rollout: Option<u8>,
    pub description: Option<String>,
    pub released_by: String,
}

#[derive(Default)]
pub struct ReleaseOverrides {
    pub is_disabled: Option<bool>,
    pub is_mandatory: Option<bool>,
    pub description: Option<String>,
    pub rollout: Option<u8>,
}

pub struct PromoteRequest {
    pub source_deployment_id: DeploymentId,
    pub destination_deployment_id: DeploymentId,
    pub label: Option<Label>,
    pub overrides: ReleaseOverrides,
    pub released_by: String,
}

pub struct RollbackRequest {
    pub deployment_id: DeploymentId,
    pub target_label: Option<Label>,
    pub released_by: String,
}

#[derive(Default)]
pub struct PatchRequest {
    pub deployment_id: DeploymentId,
    pub label: Option<Label>,
    pub is_disabled: Option<bool>,
    pub is_mandatory: Option<bool>,
    pub description: Option<String>,
    pub app_version_raw: Option<String>,
    pub rollout: Option<Option<u8>>,
}

impl ReleaseIngestor {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        cache: Arc<dyn CacheStore>,
        differ: Arc<dyn Differ>,
    ) -> Self {
        Self {
            metadata,
            blobs,
            cache,
            differ,
            max_diff_releases: 5,
        }
    }

    pub fn with_max_diff_releases(mut self, n: usize) -> Self {
        self.max_diff_releases = n;
        self
    }

    async fn invalidate_cache(&self, key_hash: &str) {
        if let Err(e) = self.cache.invalidate(key_hash).await {
            tracing::warn!(error = %e, "cache invalidation failed after release mutation");
        }
    }

    /// spec §4.G Upload path.
    pub async fn upload(&self, req: UploadRequest) -> Result<Package, StoreError> {
        validate_rollout(req.rollout)?;
        let app_version = AppVersionSpec::parse(&req.app_version_raw)?;

        let deployment = self.metadata.get_deployment_by_id(req.deployment_id).await?;
        let history = self.metadata.get_history(req.deployment_id).await?;
        if history.blocks_new_release() {
            return Err(StoreError::Conflict(
                "deployment head is an unfinished rollout; finish or disable it first".to_string(),
            ));
        }

        let pipeline = UploadPipeline::persist(&req.payload).await?;
        let size = pipeline.stat_size().await?;
        let bytes = pipeline.read().await?;

        let (package_hash, manifest) = match skyport_hash::hash_zip(std::io::Cursor::new(&bytes)) {
            Ok((hash, manifest)) => (hash, Some(manifest)),
            Err(_) => (skyport_hash::hash_flat_file(&bytes), None),
        };

        if let Some(prior_hash) = history.last_package_hash_with_same_app_version(&app_version) {
            if prior_hash == package_hash {
                return Err(StoreError::Conflict(
                    "identical package already released for this app version".to_string(),
                ));
            }
        }

        let blob_url = self.blobs.put_blob(&package_hash, bytes).await?;
        let manifest_blob_url = match &manifest {
            Some(m) => Some(self.blobs.put_blob(&format!("{package_hash}.manifest"), m.clone()).await?),
            None => None,
        };

        let package = Package {
            id: PackageId::new(),
            label: history.next_label(),
            app_version_raw: req.app_version_raw,
            app_version: Some(app_version),
            blob_url,
            size,
            package_hash,
            manifest_blob_url,
            is_disabled: false,
            is_mandatory: req.is_mandatory,
            rollout: req.rollout,
            description: req.description,
            release_method: ReleaseMethod::Upload,
            original_label: None,
            original_deployment: None,
            diff_package_map: None,
            upload_time: Utc::now(),
            released_by: req.released_by,
        };

        let committed = self.metadata.commit_package(req.deployment_id, package).await?;
        self.invalidate_cache(&deployment.key.hash_hex()).await;

        if manifest.is_some() {
            self.spawn_diffing(req.deployment_id, committed.clone());
        }

        Ok(committed)
    }

    /// spec §4.G Promote path.
    pub async fn promote(&self, req: PromoteRequest) -> Result<Package, StoreError> {
        validate_rollout(req.overrides.rollout)?;

        let (source_deployment, source_history, destination_deployment, destination_history) = tokio::try_join!(
            self.metadata.get_deployment_by_id(req.source_deployment_id),
            self.metadata.get_history(req.source_deployment_id),
            self.metadata.get_deployment_by_id(req.destination_deployment_id),
            self.metadata.get_history(req.destination_deployment_id),
        )?;

        let source = match &req.label {
            Some(label) => source_history.find_by_label(label),
            None => source_history.head(),
        }
        .ok_or_else(|| StoreError::Conflict("source deployment has no enabled head".to_string()))?;
        if source.is_disabled {
            return Err(StoreError::Conflict("source deployment has no enabled head".to_string()));
        }

        if destination_history.blocks_new_release() {
            return Err(StoreError::Conflict(
                "destination deployment head is an unfinished rollout; finish or disable it first".to_string(),
            ));
        }

        if let Some(prior_hash) = destination_history.last_package_hash_with_same_app_version(source.app_version()) {
            if prior_hash == source.package_hash {
                return Err(StoreError::Conflict(
                    "source release is identical to destination's last release for this app version".to_string(),
                ));
            }
        }

        let package = Package {
            id: PackageId::new(),
            label: destination_history.next_label(),
            app_version_raw: source.app_version_raw.clone(),
            app_version: source.app_version.clone(),
            blob_url: source.blob_url.clone(),
            size: source.size,
            package_hash: source.package_hash.clone(),
            manifest_blob_url: source.manifest_blob_url.clone(),
            is_disabled: req.overrides.is_disabled.unwrap_or(false),
            is_mandatory: req.overrides.is_mandatory.unwrap_or(source.is_mandatory),
            rollout: req.overrides.rollout,
            description: req.overrides.description.clone().or_else(|| source.description.clone()),
            release_method: ReleaseMethod::Promote,
            original_label: Some(source.label.clone()),
            original_deployment: Some(source_deployment.name.clone()),
            diff_package_map: None,
            upload_time: Utc::now(),
            released_by: req.released_by,
        };

        let committed = self
            .metadata
            .commit_package(req.destination_deployment_id, package)
            .await?;
        self.invalidate_cache(&destination_deployment.key.hash_hex()).await;

        if committed.manifest_blob_url.is_some() {
            self.spawn_diffing(req.destination_deployment_id, committed.clone());
        }

        Ok(committed)
    }

    /// spec §4.G Rollback path.
    pub async fn rollback(&self, req: RollbackRequest) -> Result<Package, StoreError> {
        let deployment = self.metadata.get_deployment_by_id(req.deployment_id).await?;
        let history = self.metadata.get_history(req.deployment_id).await?;

        let current_head = history
            .head()
            .ok_or_else(|| StoreError::Conflict("deployment has no releases to roll back from".to_string()))?;

        let target = match &req.target_label {
            Some(label) => history.find_by_label(label),
            None => history.second_newest(),
        }
        .ok_or_else(|| StoreError::Conflict("no prior release to roll back to".to_string()))?;

        if target.label == current_head.label {
            return Err(StoreError::Conflict("target release is already the current head".to_string()));
        }
        if target.app_version_raw != current_head.app_version_raw {
            return Err(StoreError::Conflict(
                "target release targets a different binary version; upload a new release instead".to_string(),
            ));
        }

        let package = Package {
            id: PackageId::new(),
            label: history.next_label(),
            app_version_raw: target.app_version_raw.clone(),
            app_version: target.app_version.clone(),
            blob_url: target.blob_url.clone(),
            size: target.size,
            package_hash: target.package_hash.clone(),
            manifest_blob_url: target.manifest_blob_url.clone(),
            is_disabled: target.is_disabled,
            is_mandatory: target.is_mandatory,
            rollout: None,
            description: target.description.clone(),
            release_method: ReleaseMethod::Rollback,
            original_label: Some(target.label.clone()),
            original_deployment: None,
            diff_package_map: None,
            upload_time: Utc::now(),
            released_by: req.released_by,
        };

        let committed = self.metadata.commit_package(req.deployment_id, package).await?;
        self.invalidate_cache(&deployment.key.hash_hex()).await;
        Ok(committed)
    }

    /// spec §4.G Patch path: metadata-only edit of the head or a given label.
    pub async fn patch(&self, req: PatchRequest) -> Result<Package, StoreError> {
        let deployment = self.metadata.get_deployment_by_id(req.deployment_id).await?;
        let history = self.metadata.get_history(req.deployment_id).await?;

        let target_label = match &req.label {
            Some(label) => label.clone(),
            None => history
                .head()
                .ok_or_else(|| StoreError::NotFound("deployment has no releases".to_string()))?
                .label
                .clone(),
        };
        let existing = history
            .find_by_label(&target_label)
            .ok_or_else(|| StoreError::NotFound(format!("package {target_label}")))?;

        let rollout = match req.rollout {
            Some(Some(new)) => {
                if !(1..=100).contains(&new) {
                    return Err(StoreError::MalformedRequest("rollout must be between 1 and 100".to_string()));
                }
                let current = existing.rollout.unwrap_or(100);
                if !existing.is_unfinished_rollout() || new <= current {
                    return Err(StoreError::Conflict(
                        "rollout may only be increased while the release is an unfinished rollout".to_string(),
                    ));
                }
                if new == 100 {
                    Some(None)
                } else {
                    Some(Some(new))
                }
            }
            Some(None) => Some(None),
            None => None,
        };

        let patch = PackagePatch {
            is_disabled: req.is_disabled,
            is_mandatory: req.is_mandatory,
            description: req.description,
            app_version_raw: req.app_version_raw,
            rollout,
            diff_package_map: None,
        };

        let updated = self
            .metadata
            .update_package(req.deployment_id, &target_label, patch)
            .await?;
        self.invalidate_cache(&deployment.key.hash_hex()).await;
        Ok(updated)
    }

    fn spawn_diffing(&self, deployment_id: DeploymentId, committed: Package) {
        let metadata = self.metadata.clone();
        let blobs = self.blobs.clone();
        let differ = self.differ.clone();
        let max_diff_releases = self.max_diff_releases;
        tokio::spawn(async move {
            if let Err(e) =
                run_diffing(metadata, blobs, differ, deployment_id, committed, max_diff_releases).await
            {
                tracing::warn!(error = %e, "diff post-processing failed");
            }
        });
    }
}

/// spec §4.G diff post-processing: runs after a successful ZIP commit,
/// outside the request/response cycle. Diff failures are logged, never
/// propagated back to the caller that triggered the release.
async fn run_diffing(
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    differ: Arc<dyn Differ>,
    deployment_id: DeploymentId,
    committed: Package,
    max_diff_releases: usize,
) -> Result<(), StoreError> {
    let history = metadata.get_history(deployment_id).await?;
    let candidates: Vec<&Package> = history
        .iter_newest_first()
        .filter(|p| p.label != committed.label)
        .filter(|p| p.manifest_blob_url.is_some())
        .filter(|p| p.app_version().canonical() == committed.app_version().canonical())
        .take(max_diff_releases)
        .collect();

    let mut diff_map: HashMap<String, DiffEntry> = HashMap::new();
    for prior in candidates {
        let delta = match differ.diff(&prior.blob_url, &committed.blob_url).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, prior_hash = %prior.package_hash, "diff computation failed for one pair");
                continue;
            }
        };
        let size = delta.len() as i64;
        let blob_id = format!("{}-diff-{}", committed.package_hash, prior.package_hash);
        let blob_url = blobs.put_blob(&blob_id, delta).await?;
        diff_map.insert(prior.package_hash.clone(), DiffEntry { size, blob_url });
    }

    if diff_map.is_empty() {
        return Ok(());
    }

    metadata
        .update_package(
            deployment_id,
            &committed.label,
            PackagePatch {
                diff_package_map: Some(diff_map),
                ..Default::default()
            },
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use skyport_cache::FakeCacheStore;
    use skyport_metadata::FakeMetadataStore;
    use skyport_types::{ids::AccountId, Email};

    use super::*;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut writer = zip::ZipWriter::new(cursor);
            let options = zip::write::FileOptions::default();
            for (name, contents) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    async fn new_ingestor() -> (ReleaseIngestor, Arc<FakeMetadataStore>, DeploymentId) {
        let metadata = Arc::new(FakeMetadataStore::new());
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(skyport_blob::LocalBlobStore::new(dir.path().to_path_buf()));
        let cache = Arc::new(FakeCacheStore::new());
        let differ = Arc::new(NoopDiffer);

        let owner = Email::parse("owner@example.com").unwrap();
        let app = metadata.create_app("demo", owner, AccountId::new()).await.unwrap();
        let deployment = metadata.create_deployment(app.id, "Staging").await.unwrap();

        let ingestor = ReleaseIngestor::new(metadata.clone(), blobs, cache, differ);
        (ingestor, metadata, deployment.id)
    }

    #[tokio::test]
    async fn upload_commits_the_first_release_as_v1() {
        let (ingestor, _metadata, deployment_id) = new_ingestor().await;
        let payload = build_zip(&[("index.js", b"console.log(1)")]);

        let committed = ingestor
            .upload(UploadRequest {
                deployment_id,
                payload,
                app_version_raw: "1.0.0".to_string(),
                is_mandatory: false,
                rollout: None,
                description: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(committed.label.as_str(), "v1");
        assert!(committed.manifest_blob_url.is_some());
    }

    #[tokio::test]
    async fn upload_rejects_identical_payload_for_the_same_app_version() {
        let (ingestor, _metadata, deployment_id) = new_ingestor().await;
        let payload = build_zip(&[("index.js", b"console.log(1)")]);

        ingestor
            .upload(UploadRequest {
                deployment_id,
                payload: payload.clone(),
                app_version_raw: "1.0.0".to_string(),
                is_mandatory: false,
                rollout: None,
                description: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap();

        let err = ingestor
            .upload(UploadRequest {
                deployment_id,
                payload,
                app_version_raw: "1.0.0".to_string(),
                is_mandatory: false,
                rollout: None,
                description: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn upload_rejects_while_head_is_an_unfinished_rollout() {
        let (ingestor, _metadata, deployment_id) = new_ingestor().await;
        ingestor
            .upload(UploadRequest {
                deployment_id,
                payload: build_zip(&[("a", b"1")]),
                app_version_raw: "1.0.0".to_string(),
                is_mandatory: false,
                rollout: Some(20),
                description: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap();

        let err = ingestor
            .upload(UploadRequest {
                deployment_id,
                payload: build_zip(&[("b", b"2")]),
                app_version_raw: "1.1.0".to_string(),
                is_mandatory: false,
                rollout: None,
                description: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn rollback_without_target_picks_second_newest() {
        let (ingestor, _metadata, deployment_id) = new_ingestor().await;
        ingestor
            .upload(UploadRequest {
                deployment_id,
                payload: build_zip(&[("a", b"1")]),
                app_version_raw: "1.0.0".to_string(),
                is_mandatory: false,
                rollout: None,
                description: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap();
        ingestor
            .upload(UploadRequest {
                deployment_id,
                payload: build_zip(&[("b", b"2")]),
                app_version_raw: "1.0.0".to_string(),
                is_mandatory: false,
                rollout: None,
                description: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap();

        let rolled_back = ingestor
            .rollback(RollbackRequest {
                deployment_id,
                target_label: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(rolled_back.label.as_str(), "v3");
        assert_eq!(rolled_back.original_label.unwrap().as_str(), "v1");
    }

    #[tokio::test]
    async fn rollback_rejects_a_different_binary_version() {
        let (ingestor, _metadata, deployment_id) = new_ingestor().await;
        ingestor
            .upload(UploadRequest {
                deployment_id,
                payload: build_zip(&[("a", b"1")]),
                app_version_raw: "1.0.0".to_string(),
                is_mandatory: false,
                rollout: None,
                description: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap();
        ingestor
            .upload(UploadRequest {
                deployment_id,
                payload: build_zip(&[("b", b"2")]),
                app_version_raw: "2.0.0".to_string(),
                is_mandatory: false,
                rollout: None,
                description: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap();

        let err = ingestor
            .rollback(RollbackRequest {
                deployment_id,
                target_label: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn patch_rejects_rollout_decrease() {
        let (ingestor, _metadata, deployment_id) = new_ingestor().await;
        ingestor
            .upload(UploadRequest {
                deployment_id,
                payload: build_zip(&[("a", b"1")]),
                app_version_raw: "1.0.0".to_string(),
                is_mandatory: false,
                rollout: Some(20),
                description: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap();

        let err = ingestor
            .patch(PatchRequest {
                deployment_id,
                rollout: Some(Some(10)),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn patch_sets_rollout_to_null_at_100() {
        let (ingestor, metadata, deployment_id) = new_ingestor().await;
        ingestor
            .upload(UploadRequest {
                deployment_id,
                payload: build_zip(&[("a", b"1")]),
                app_version_raw: "1.0.0".to_string(),
                is_mandatory: false,
                rollout: Some(20),
                description: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap();

        ingestor
            .patch(PatchRequest {
                deployment_id,
                rollout: Some(Some(100)),
                ..Default::default()
            })
            .await
            .unwrap();

        let history = metadata.get_history(deployment_id).await.unwrap();
        assert_eq!(history.head().unwrap().rollout, None);
    }

    #[tokio::test]
    async fn promote_clones_the_source_package_into_the_destination() {
        let metadata = Arc::new(FakeMetadataStore::new());
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(skyport_blob::LocalBlobStore::new(dir.path().to_path_buf()));
        let cache = Arc::new(FakeCacheStore::new());
        let ingestor = ReleaseIngestor::new(metadata.clone(), blobs, cache, Arc::new(NoopDiffer));

        let owner = Email::parse("owner@example.com").unwrap();
        let app = metadata.create_app("demo", owner, AccountId::new()).await.unwrap();
        let staging = metadata.create_deployment(app.id, "Staging").await.unwrap();
        let production = metadata.create_deployment(app.id, "Production").await.unwrap();

        ingestor
            .upload(UploadRequest {
                deployment_id: staging.id,
                payload: build_zip(&[("a", b"1")]),
                app_version_raw: "1.0.0".to_string(),
                is_mandatory: false,
                rollout: None,
                description: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap();

        let promoted = ingestor
            .promote(PromoteRequest {
                source_deployment_id: staging.id,
                destination_deployment_id: production.id,
                label: None,
                overrides: ReleaseOverrides::default(),
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(promoted.label.as_str(), "v1");
        assert_eq!(promoted.original_deployment.as_deref(), Some("Staging"));
        assert_eq!(promoted.original_label.unwrap().as_str(), "v1");
    }

    #[tokio::test]
    async fn promote_rejects_when_destination_already_has_the_same_release() {
        let metadata = Arc::new(FakeMetadataStore::new());
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(skyport_blob::LocalBlobStore::new(dir.path().to_path_buf()));
        let cache = Arc::new(FakeCacheStore::new());
        let ingestor = ReleaseIngestor::new(metadata.clone(), blobs, cache, Arc::new(NoopDiffer));

        let owner = Email::parse("owner@example.com").unwrap();
        let app = metadata.create_app("demo", owner, AccountId::new()).await.unwrap();
        let staging = metadata.create_deployment(app.id, "Staging").await.unwrap();
        let production = metadata.create_deployment(app.id, "Production").await.unwrap();

        let payload = build_zip(&[("a", b"1")]);
        ingestor
            .upload(UploadRequest {
                deployment_id: staging.id,
                payload: payload.clone(),
                app_version_raw: "1.0.0".to_string(),
                is_mandatory: false,
                rollout: None,
                description: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap();
        ingestor
            .upload(UploadRequest {
                deployment_id: production.id,
                payload,
                app_version_raw: "1.0.0".to_string(),
                is_mandatory: false,
                rollout: None,
                description: None,
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap();

        let err = ingestor
            .promote(PromoteRequest {
                source_deployment_id: staging.id,
                destination_deployment_id: production.id,
                label: None,
                overrides: ReleaseOverrides::default(),
                released_by: "owner@example.com".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }
}
