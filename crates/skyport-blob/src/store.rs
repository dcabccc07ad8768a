use async_trait::async_trait;
use skyport_types::StoreError;

/// The well-known key the health probe writes and reads on startup
/// (spec §4.B).
pub const HEALTH_CHECK_KEY: &str = "__health";
pub const HEALTH_CHECK_VALUE: &[u8] = b"health";

/// Content-addressed payload storage. Callers never interpret the string
/// [`BlobStore::get_blob_url`] returns — it may be a presigned URL, a CDN
/// URL, or a local file URI.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_blob(&self, id: &str, bytes: Vec<u8>) -> Result<String, StoreError>;
    async fn get_blob_url(&self, id: &str) -> Result<String, StoreError>;
    async fn delete_blob(&self, id: &str) -> Result<(), StoreError>;

    /// Writes and reads back [`HEALTH_CHECK_VALUE`] under [`HEALTH_CHECK_KEY`].
    async fn health_check(&self) -> Result<(), StoreError> {
        self.put_blob(HEALTH_CHECK_KEY, HEALTH_CHECK_VALUE.to_vec()).await?;
        self.get_blob_url(HEALTH_CHECK_KEY).await?;
        Ok(())
    }
}
