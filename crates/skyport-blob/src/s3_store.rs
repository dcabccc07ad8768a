use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use skyport_types::StoreError;

use crate::store::BlobStore;

/// S3-backed [`BlobStore`]. URLs are presigned GETs, time-limited the way
/// spec §4.B allows.
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    presign_ttl: Duration,
}

impl S3BlobStore {
    pub async fn new(bucket: String, presign_ttl: Duration) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&config);
        Self {
            client,
            bucket,
            presign_ttl,
        }
    }

    pub fn with_client(client: Client, bucket: String, presign_ttl: Duration) -> Self {
        Self {
            client,
            bucket,
            presign_ttl,
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put_blob(&self, id: &str, bytes: Vec<u8>) -> Result<String, StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(id)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StoreError::ConnectionFailed(format!("s3 put_object failed: {e}")))?;
        Ok(id.to_string())
    }

    async fn get_blob_url(&self, id: &str) -> Result<String, StoreError> {
        let presigning_config = PresigningConfig::expires_in(self.presign_ttl)
            .map_err(|e| StoreError::Other(format!("invalid presign ttl: {e}")))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(id)
            .presigned(presigning_config)
            .await
            .map_err(|e| StoreError::ConnectionFailed(format!("s3 presign failed: {e}")))?;
        Ok(presigned.uri().to_string())
    }

    async fn delete_blob(&self, id: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(id)
            .send()
            .await
            .map_err(|e| StoreError::ConnectionFailed(format!("s3 delete_object failed: {e}")))?;
        Ok(())
    }
}
