use serde::Deserialize;

/// Layered configuration: built-in defaults, then `config/default.toml` (or
/// the file named by `SKYPORT_CONFIG_FILE`), then `SKYPORT__*` environment
/// variables, each source overriding the last.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub storage: StorageSettings,
    pub release: ReleaseSettings,
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlobBackend {
    Local,
    S3,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub backend: BlobBackend,
    pub local_path: Option<String>,
    pub s3_bucket: Option<String>,
    pub presign_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseSettings {
    pub max_diff_releases: usize,
    /// Executable that computes binary diffs; omitted means diffing stays
    /// disabled (spec §4.G, §9).
    pub differ_executable: Option<String>,
}

/// Bounds for the sliding-window limiter guarding the release-upload route
/// (spec §6: "100 requests / 15 min / IP").
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    pub upload_max_requests: u32,
    pub upload_window_seconds: u64,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_file = std::env::var("SKYPORT_CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&config_file).required(false))
            .add_source(config::Environment::with_prefix("SKYPORT").separator("__"))
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be greater than 0");
        }
        if !self.database.url.starts_with("postgres") {
            anyhow::bail!("database.url must be a postgres connection string");
        }
        if !self.redis.url.starts_with("redis://") {
            anyhow::bail!("redis.url must start with redis://");
        }
        if self.storage.backend == BlobBackend::S3 && self.storage.s3_bucket.is_none() {
            anyhow::bail!("storage.s3_bucket is required when storage.backend = \"s3\"");
        }
        Ok(())
    }
}
