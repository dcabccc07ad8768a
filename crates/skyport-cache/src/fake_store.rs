use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use skyport_types::{update_check::UpdateCheckCacheResponse, LabelMetrics, MetricKind, StoreError};

use crate::keys::{active_label_key, cache_entry_key, cache_keys_set, metrics_key};
use crate::store::CacheStore;

#[derive(Default)]
struct Inner {
    entries: HashMap<String, UpdateCheckCacheResponse>,
    key_sets: HashMap<String, HashSet<String>>,
    metrics: HashMap<String, HashMap<&'static str, i64>>,
    active_labels: HashMap<String, String>,
}

/// An in-memory [`CacheStore`] for tests, mirroring
/// [`crate::redis_store::RedisCacheStore`]'s key layout so tests exercise
/// the same addressing scheme production does.
#[derive(Default)]
pub struct FakeCacheStore {
    inner: Mutex<Inner>,
}

impl FakeCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: reads a counter directly, bypassing the gateway API.
    pub fn metric(&self, deployment_key: &str, label: &str, field: &str) -> i64 {
        self.inner
            .lock()
            .unwrap()
            .metrics
            .get(&metrics_key(deployment_key, label))
            .and_then(|m| m.get(field))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl CacheStore for FakeCacheStore {
    async fn get_cached(
        &self,
        deployment_key_hash: &str,
        url: &str,
    ) -> Result<Option<UpdateCheckCacheResponse>, StoreError> {
        let key = cache_entry_key(deployment_key_hash, url);
        Ok(self.inner.lock().unwrap().entries.get(&key).cloned())
    }

    async fn set_cached(
        &self,
        deployment_key_hash: &str,
        url: &str,
        response: &UpdateCheckCacheResponse,
    ) -> Result<(), StoreError> {
        let key = cache_entry_key(deployment_key_hash, url);
        let mut inner = self.inner.lock().unwrap();
        inner.entries.insert(key.clone(), response.clone());
        inner
            .key_sets
            .entry(cache_keys_set(deployment_key_hash))
            .or_default()
            .insert(key);
        Ok(())
    }

    async fn invalidate(&self, deployment_key_hash: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(keys) = inner.key_sets.remove(&cache_keys_set(deployment_key_hash)) {
            for key in keys {
                inner.entries.remove(&key);
            }
        }
        Ok(())
    }

    async fn increment_label(&self, deployment_key: &str, label: &str, status: MetricKind) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        *inner
            .metrics
            .entry(metrics_key(deployment_key, label))
            .or_default()
            .entry(status.field_name())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn clear_metrics(&self, deployment_key: &str) -> Result<(), StoreError> {
        let prefix = format!("metrics:{deployment_key}:");
        self.inner.lock().unwrap().metrics.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    async fn get_metrics(&self, deployment_key: &str) -> Result<HashMap<String, LabelMetrics>, StoreError> {
        let prefix = format!("metrics:{deployment_key}:");
        let inner = self.inner.lock().unwrap();
        let mut out = HashMap::new();
        for (key, fields) in inner.metrics.iter() {
            let Some(label) = key.strip_prefix(&prefix) else { continue };
            let mut metrics = LabelMetrics::default();
            for (field, value) in fields {
                metrics.set_field(field, *value);
            }
            out.insert(label.to_string(), metrics);
        }
        Ok(out)
    }

    async fn get_active_label(&self, deployment_key: &str, client_unique_id: &str) -> Result<Option<String>, StoreError> {
        let key = active_label_key(deployment_key, client_unique_id);
        Ok(self.inner.lock().unwrap().active_labels.get(&key).cloned())
    }

    async fn update_active_app_for_client(
        &self,
        deployment_key: &str,
        client_unique_id: &str,
        new_label: &str,
        old_label: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = active_label_key(deployment_key, client_unique_id);

        if let Some(old) = old_label {
            let current = inner.active_labels.get(&key).cloned();
            let effective_old = current.as_deref().unwrap_or(old);
            if !effective_old.is_empty() {
                *inner
                    .metrics
                    .entry(metrics_key(deployment_key, effective_old))
                    .or_default()
                    .entry("active")
                    .or_insert(0) -= 1;
            }
        }
        *inner
            .metrics
            .entry(metrics_key(deployment_key, new_label))
            .or_default()
            .entry("active")
            .or_insert(0) += 1;
        inner.active_labels.insert(key, new_label.to_string());
        Ok(())
    }

    async fn remove_client_active_label(
        &self,
        deployment_key: &str,
        client_unique_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = active_label_key(deployment_key, client_unique_id);
        if let Some(label) = inner.active_labels.remove(&key) {
            *inner
                .metrics
                .entry(metrics_key(deployment_key, &label))
                .or_default()
                .entry("active")
                .or_insert(0) -= 1;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyport_types::update_check::UpdateInfo;

    fn response() -> UpdateCheckCacheResponse {
        UpdateCheckCacheResponse {
            original_package: UpdateInfo::no_update("1.0.0"),
            rollout_package: None,
            rollout: None,
        }
    }

    #[tokio::test]
    async fn cache_round_trip_and_invalidate() {
        let store = FakeCacheStore::new();
        store.set_cached("hash1", "url1", &response()).await.unwrap();
        assert!(store.get_cached("hash1", "url1").await.unwrap().is_some());

        store.invalidate("hash1").await.unwrap();
        assert!(store.get_cached("hash1", "url1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn active_label_swap_adjusts_both_counters() {
        let store = FakeCacheStore::new();
        store
            .update_active_app_for_client("dep", "client-1", "v1", None)
            .await
            .unwrap();
        assert_eq!(store.metric("dep", "v1", "active"), 1);

        store
            .update_active_app_for_client("dep", "client-1", "v2", Some("v1"))
            .await
            .unwrap();
        assert_eq!(store.metric("dep", "v1", "active"), 0);
        assert_eq!(store.metric("dep", "v2", "active"), 1);
    }

    #[tokio::test]
    async fn remove_active_label_decrements_without_replacement() {
        let store = FakeCacheStore::new();
        store
            .update_active_app_for_client("dep", "client-1", "v1", None)
            .await
            .unwrap();
        store.remove_client_active_label("dep", "client-1").await.unwrap();
        assert_eq!(store.metric("dep", "v1", "active"), 0);
    }

    #[tokio::test]
    async fn increment_label_counts_each_call() {
        let store = FakeCacheStore::new();
        store.increment_label("dep", "v1", MetricKind::Downloaded).await.unwrap();
        store.increment_label("dep", "v1", MetricKind::Downloaded).await.unwrap();
        assert_eq!(store.metric("dep", "v1", "downloaded"), 2);
    }

    #[tokio::test]
    async fn get_metrics_reports_only_the_requested_deployment() {
        let store = FakeCacheStore::new();
        store.increment_label("dep", "v1", MetricKind::Downloaded).await.unwrap();
        store.increment_label("dep", "v2", MetricKind::DeploymentFailed).await.unwrap();
        store.increment_label("other", "v1", MetricKind::Downloaded).await.unwrap();

        let metrics = store.get_metrics("dep").await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics["v1"].downloaded, 1);
        assert_eq!(metrics["v2"].failed, 1);
    }
}
