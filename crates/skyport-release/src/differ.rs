use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use skyport_types::StoreError;

/// Computes a binary delta between two committed release payloads (spec
/// §4.G diff post-processing). Locators are whatever
/// [`skyport_blob::BlobStore::get_blob_url`] returned for each side — a
/// presigned URL or a local path — and stay opaque to the release ingestor;
/// fetching the bytes they point at is the differ's job. A differ "may be
/// absent" per spec, so implementations are free to decline with `Ok(None)`.
#[async_trait]
pub trait Differ: Send + Sync {
    async fn diff(&self, from_locator: &str, to_locator: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// The default differ: diffing is disabled, `diffPackageMap` stays empty.
pub struct NoopDiffer;

#[async_trait]
impl Differ for NoopDiffer {
    async fn diff(&self, _from_locator: &str, _to_locator: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(None)
    }
}

/// Shells out to an external executable to compute the delta, invoked as
/// `<executable> <from-locator> <to-locator> <out-path>`. The binary is
/// expected to write the delta bytes to `out-path` and exit zero on success;
/// a non-zero exit means the pair could not be diffed.
pub struct CommandDiffer {
    executable: String,
}

impl CommandDiffer {
    pub fn new(executable: impl Into<String>) -> Self {
        Self { executable: executable.into() }
    }
}

#[async_trait]
impl Differ for CommandDiffer {
    async fn diff(&self, from_locator: &str, to_locator: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let out_file = tempfile::NamedTempFile::new()
            .map_err(|e| StoreError::Other(format!("could not create diff output file: {e}")))?;

        let status = Command::new(&self.executable)
            .arg(from_locator)
            .arg(to_locator)
            .arg(out_file.path())
            .status()
            .await
            .map_err(|e| StoreError::Other(format!("differ executable failed to start: {e}")))?;

        if !status.success() {
            return Err(StoreError::Other(format!(
                "differ executable exited with status {status}"
            )));
        }

        let mut out = tokio::fs::File::open(out_file.path())
            .await
            .map_err(|e| StoreError::Other(format!("could not read diff output: {e}")))?;
        let mut buf = Vec::new();
        out.read_to_end(&mut buf)
            .await
            .map_err(|e| StoreError::Other(format!("could not read diff output: {e}")))?;

        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_differ_always_declines() {
        let differ = NoopDiffer;
        assert_eq!(differ.diff("blob://a", "blob://b").await.unwrap(), None);
    }
}
