use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

use skyport_api::ApiState;
use skyport_blob::{BlobStore, LocalBlobStore, S3BlobStore};
use skyport_cache::{CacheStore, RedisCacheStore};
use skyport_metadata::{MetadataStore, MigrationManager, PostgresMetadataStore};
use skyport_release::{CommandDiffer, Differ, NoopDiffer, ReleaseIngestor};

use crate::config::{AppConfig, BlobBackend};

/// Connects every gateway named in the config and assembles them into the
/// state the HTTP surface runs against.
pub async fn build_state(config: &AppConfig) -> anyhow::Result<ApiState> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    MigrationManager::new(pool.clone()).run_pending().await?;

    let metadata: Arc<dyn MetadataStore> = Arc::new(PostgresMetadataStore::new(pool));
    let cache: Arc<dyn CacheStore> = Arc::new(RedisCacheStore::connect(&config.redis.url).await?);

    let blobs: Arc<dyn BlobStore> = match config.storage.backend {
        BlobBackend::Local => {
            let path = config.storage.local_path.clone().unwrap_or_else(|| "./storage".to_string());
            Arc::new(LocalBlobStore::new(std::path::PathBuf::from(path)))
        }
        BlobBackend::S3 => {
            let bucket = config
                .storage
                .s3_bucket
                .clone()
                .expect("validated at config load");
            Arc::new(S3BlobStore::new(bucket, Duration::from_secs(config.storage.presign_ttl_seconds)).await)
        }
    };

    let differ: Arc<dyn Differ> = match &config.release.differ_executable {
        Some(executable) => Arc::new(CommandDiffer::new(executable.clone())),
        None => Arc::new(NoopDiffer),
    };

    let release = Arc::new(
        ReleaseIngestor::new(metadata.clone(), blobs.clone(), cache.clone(), differ)
            .with_max_diff_releases(config.release.max_diff_releases),
    );

    Ok(ApiState::new(metadata, blobs, cache, release))
}
