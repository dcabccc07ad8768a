use std::path::{Path, PathBuf};

use tokio::fs;

use skyport_types::StoreError;

/// Holds the upload path's payload on local disk for the steps that need a
/// real file (stat, hashing) and deletes it on drop regardless of how the
/// pipeline exits (spec §4.G step 3, step 10).
pub struct UploadPipeline {
    path: PathBuf,
}

impl UploadPipeline {
    /// Writes `bytes` to a fresh temp path (spec §4.G step 3).
    pub async fn persist(bytes: &[u8]) -> Result<Self, StoreError> {
        let path = std::env::temp_dir().join(format!("skyport-upload-{}.bin", uuid::Uuid::new_v4()));
        fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::Other(format!("could not persist upload payload: {e}")))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `stat`s the payload, failing `malformed-request` if it is missing or
    /// a directory (spec §4.G step 3).
    pub async fn stat_size(&self) -> Result<i64, StoreError> {
        let meta = fs::metadata(&self.path)
            .await
            .map_err(|_| StoreError::MalformedRequest("uploaded payload is missing".to_string()))?;
        if meta.is_dir() {
            return Err(StoreError::MalformedRequest("uploaded payload is a directory".to_string()));
        }
        Ok(meta.len() as i64)
    }

    pub async fn read(&self) -> Result<Vec<u8>, StoreError> {
        fs::read(&self.path)
            .await
            .map_err(|e| StoreError::Other(format!("could not read upload payload: {e}")))
    }
}

impl Drop for UploadPipeline {
    fn drop(&mut self) {
        let path = self.path.clone();
        tokio::spawn(async move {
            let _ = tokio::fs::remove_file(&path).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persist_then_stat_reports_the_written_size() {
        let pipeline = UploadPipeline::persist(b"hello").await.unwrap();
        assert_eq!(pipeline.stat_size().await.unwrap(), 5);
        assert_eq!(pipeline.read().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn drop_removes_the_temp_file() {
        let path = {
            let pipeline = UploadPipeline::persist(b"x").await.unwrap();
            pipeline.path().to_path_buf()
        };
        // Drop schedules an async removal; give it a turn to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(tokio::fs::metadata(&path).await.is_err());
    }
}
