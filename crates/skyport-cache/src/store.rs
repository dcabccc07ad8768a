use std::collections::HashMap;

use async_trait::async_trait;

use skyport_types::{update_check::UpdateCheckCacheResponse, LabelMetrics, MetricKind, StoreError};

/// The cache/metrics store gateway (spec §4.C). All three families of
/// operations are best-effort: the acquisition endpoint must treat any
/// error here as a cache miss rather than a request failure (spec §7).
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_cached(
        &self,
        deployment_key_hash: &str,
        url: &str,
    ) -> Result<Option<UpdateCheckCacheResponse>, StoreError>;

    async fn set_cached(
        &self,
        deployment_key_hash: &str,
        url: &str,
        response: &UpdateCheckCacheResponse,
    ) -> Result<(), StoreError>;

    /// Purges every entry cached under `deployment_key_hash`.
    async fn invalidate(&self, deployment_key_hash: &str) -> Result<(), StoreError>;

    async fn increment_label(&self, deployment_key: &str, label: &str, status: MetricKind) -> Result<(), StoreError>;

    async fn clear_metrics(&self, deployment_key: &str) -> Result<(), StoreError>;

    /// Reads every label's rolling counters for the management surface's
    /// metrics endpoint (spec §6), keyed by label string.
    async fn get_metrics(&self, deployment_key: &str) -> Result<HashMap<String, LabelMetrics>, StoreError>;

    /// The label a client currently has installed, if tracked. Used by the
    /// legacy `reportStatus/deploy` protocol (spec §4.H), which patches
    /// counters only when the reported label differs from this value.
    async fn get_active_label(&self, deployment_key: &str, client_unique_id: &str) -> Result<Option<String>, StoreError>;

    /// Atomically swaps the client's active label: decrements `Active` for
    /// `old_label` (if any) and increments it for `new_label` (spec §4.C.3).
    async fn update_active_app_for_client(
        &self,
        deployment_key: &str,
        client_unique_id: &str,
        new_label: &str,
        old_label: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Decrements `Active` for the client's current label without
    /// recording a replacement.
    async fn remove_client_active_label(
        &self,
        deployment_key: &str,
        client_unique_id: &str,
    ) -> Result<(), StoreError>;

    /// Cheap connectivity probe for `GET /health` (spec §6).
    async fn health_check(&self) -> Result<(), StoreError>;
}
