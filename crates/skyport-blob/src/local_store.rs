use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use skyport_types::StoreError;

use crate::store::BlobStore;

/// Filesystem-backed [`BlobStore`], used by local development and tests in
/// place of S3.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put_blob(&self, id: &str, bytes: Vec<u8>) -> Result<String, StoreError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::Other(format!("could not create blob root: {e}")))?;
        fs::write(self.path_for(id), bytes)
            .await
            .map_err(|e| StoreError::Other(format!("could not write blob '{id}': {e}")))?;
        Ok(id.to_string())
    }

    async fn get_blob_url(&self, id: &str) -> Result<String, StoreError> {
        let path = self.path_for(id);
        if !fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::Other(format!("could not stat blob '{id}': {e}")))?
        {
            return Err(StoreError::NotFound(format!("blob '{id}'")));
        }
        Ok(format!("file://{}", path.display()))
    }

    async fn delete_blob(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Other(format!("could not delete blob '{id}': {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf());

        store.put_blob("pkg-1", b"payload".to_vec()).await.unwrap();
        let url = store.get_blob_url("pkg-1").await.unwrap();
        assert!(url.contains("pkg-1"));
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf());
        let err = store.get_blob_url("missing").await.unwrap_err();
        assert_eq!(err.kind(), "not-found");
    }

    #[tokio::test]
    async fn health_check_writes_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf());
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf());
        store.delete_blob("never-existed").await.unwrap();
    }
}
