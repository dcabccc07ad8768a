use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use std::collections::HashMap;

use skyport_types::{update_check::UpdateCheckCacheResponse, LabelMetrics, MetricKind, StoreError};

use crate::keys::{active_label_key, cache_entry_key, cache_keys_set, metrics_key};
use crate::store::CacheStore;

fn map_redis_error(err: redis::RedisError) -> StoreError {
    StoreError::ConnectionFailed(err.to_string())
}

/// Redis-backed [`CacheStore`]. Connects through a [`ConnectionManager`],
/// which reconnects transparently on the cache side so a blip there never
/// becomes a hard failure for the caller (spec §7).
pub struct RedisCacheStore {
    conn: ConnectionManager,
}

impl RedisCacheStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        let conn = client.get_tokio_connection_manager().await.map_err(map_redis_error)?;
        Ok(Self { conn })
    }

    pub fn from_connection_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

/// Atomically swaps the `activelabel:{deploymentKey}:{clientUniqueId}` key
/// and adjusts the two metrics hashes involved, guarded server-side so two
/// concurrent reports from the same client can't interleave.
const SWAP_ACTIVE_LABEL_SCRIPT: &str = r#"
local active_key = KEYS[1]
local expected_old = ARGV[1]
local new_label = ARGV[2]
local old_metrics_key = ARGV[3]
local new_metrics_key = ARGV[4]
local has_old = ARGV[5]

local current = redis.call('GET', active_key)
if has_old == '1' then
    if current ~= false and current ~= expected_old then
        -- another report already moved the client; trust the server's view
        expected_old = current
    end
    if expected_old ~= '' then
        redis.call('HINCRBY', old_metrics_key, 'active', -1)
    end
end

redis.call('HINCRBY', new_metrics_key, 'active', 1)
redis.call('SET', active_key, new_label)
return 1
"#;

const REMOVE_ACTIVE_LABEL_SCRIPT: &str = r#"
local active_key = KEYS[1]
local metrics_prefix = ARGV[1]

local current = redis.call('GET', active_key)
if current then
    redis.call('HINCRBY', metrics_prefix .. current, 'active', -1)
    redis.call('DEL', active_key)
end
return 1
"#;

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get_cached(
        &self,
        deployment_key_hash: &str,
        url: &str,
    ) -> Result<Option<UpdateCheckCacheResponse>, StoreError> {
        let mut conn = self.conn.clone();
        let key = cache_entry_key(deployment_key_hash, url);
        let raw: Option<String> = conn.get(&key).await.map_err(map_redis_error)?;
        match raw {
            None => Ok(None),
            Some(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| StoreError::Other(format!("corrupt cache entry: {e}"))),
        }
    }

    async fn set_cached(
        &self,
        deployment_key_hash: &str,
        url: &str,
        response: &UpdateCheckCacheResponse,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = cache_entry_key(deployment_key_hash, url);
        let body = serde_json::to_string(response)
            .map_err(|e| StoreError::Other(format!("could not serialise cache entry: {e}")))?;

        let set_key = cache_keys_set(deployment_key_hash);
        redis::pipe()
            .atomic()
            .set(&key, body)
            .sadd(&set_key, &key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn invalidate(&self, deployment_key_hash: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let set_key = cache_keys_set(deployment_key_hash);
        let members: Vec<String> = conn.smembers(&set_key).await.map_err(map_redis_error)?;
        if members.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for member in &members {
            pipe.del(member);
        }
        pipe.del(&set_key);
        pipe.query_async::<_, ()>(&mut conn).await.map_err(map_redis_error)
    }

    async fn increment_label(&self, deployment_key: &str, label: &str, status: MetricKind) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = metrics_key(deployment_key, label);
        conn.hincr(&key, status.field_name(), 1i64)
            .await
            .map_err(map_redis_error)
    }

    async fn clear_metrics(&self, deployment_key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("metrics:{deployment_key}:*");
        let keys: Vec<String> = conn.keys(&pattern).await.map_err(map_redis_error)?;
        if keys.is_empty() {
            return Ok(());
        }
        conn.del(keys).await.map_err(map_redis_error)
    }

    async fn get_metrics(&self, deployment_key: &str) -> Result<HashMap<String, LabelMetrics>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("metrics:{deployment_key}:*");
        let keys: Vec<String> = conn.keys(&pattern).await.map_err(map_redis_error)?;
        let prefix = format!("metrics:{deployment_key}:");

        let mut out = HashMap::new();
        for key in keys {
            let Some(label) = key.strip_prefix(&prefix) else { continue };
            let fields: HashMap<String, i64> = conn.hgetall(&key).await.map_err(map_redis_error)?;
            let mut metrics = LabelMetrics::default();
            for (field, value) in fields {
                metrics.set_field(&field, value);
            }
            out.insert(label.to_string(), metrics);
        }
        Ok(out)
    }

    async fn get_active_label(&self, deployment_key: &str, client_unique_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let key = active_label_key(deployment_key, client_unique_id);
        conn.get(&key).await.map_err(map_redis_error)
    }

    async fn update_active_app_for_client(
        &self,
        deployment_key: &str,
        client_unique_id: &str,
        new_label: &str,
        old_label: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let active_key = active_label_key(deployment_key, client_unique_id);
        let old_metrics = metrics_key(deployment_key, old_label.unwrap_or(""));
        let new_metrics = metrics_key(deployment_key, new_label);

        Script::new(SWAP_ACTIVE_LABEL_SCRIPT)
            .key(active_key)
            .arg(old_label.unwrap_or(""))
            .arg(new_label)
            .arg(&old_metrics)
            .arg(&new_metrics)
            .arg(if old_label.is_some() { "1" } else { "0" })
            .invoke_async::<_, ()>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn remove_client_active_label(
        &self,
        deployment_key: &str,
        client_unique_id: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let active_key = active_label_key(deployment_key, client_unique_id);
        let metrics_prefix = format!("metrics:{deployment_key}:");

        Script::new(REMOVE_ACTIVE_LABEL_SCRIPT)
            .key(active_key)
            .arg(metrics_prefix)
            .invoke_async::<_, ()>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }
}
