use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::error::StoreError;
use crate::ids::{AppId, DeploymentId, PackageId};

fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{10,100}$").expect("static regex"))
}

/// An opaque, immutable deployment key (spec §3, §6). Stored and compared
/// as an owned string; callers that need the cache-key hash call
/// [`DeploymentKey::hash_hex`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeploymentKey(String);

impl DeploymentKey {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        if !key_regex().is_match(raw) {
            return Err(StoreError::MalformedRequest(
                "deployment key must be 10-100 characters from [A-Za-z0-9_-]".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex-encoded SHA-256 of the key, used as the cache-entry and metrics
    /// prefix so the raw key never has to be stored in the cache store.
    pub fn hash_hex(&self) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(digest)
    }
}

impl fmt::Display for DeploymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeploymentKey {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DeploymentKey::parse(&value)
    }
}

impl From<DeploymentKey> for String {
    fn from(key: DeploymentKey) -> Self {
        key.0
    }
}

/// A named release channel within an app (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub app_id: AppId,
    pub name: String,
    pub key: DeploymentKey,
    pub current_package_id: Option<PackageId>,
    /// Optimistic-concurrency token bumped on every `commit_package`
    /// (spec §4.A, §5: per-deployment label assignment is serialisable).
    pub history_version: i64,
}
