use std::sync::Arc;

use skyport_blob::BlobStore;
use skyport_cache::CacheStore;
use skyport_metadata::MetadataStore;
use skyport_release::ReleaseIngestor;

/// Shared state handed to every handler. Cloning is cheap: every field is
/// already behind an `Arc`.
#[derive(Clone)]
pub struct ApiState {
    pub metadata: Arc<dyn MetadataStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub cache: Arc<dyn CacheStore>,
    pub release: Arc<ReleaseIngestor>,
}

impl ApiState {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        cache: Arc<dyn CacheStore>,
        release: Arc<ReleaseIngestor>,
    ) -> Self {
        Self {
            metadata,
            blobs,
            cache,
            release,
        }
    }
}
