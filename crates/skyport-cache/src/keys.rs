use sha2::{Digest, Sha256};

/// Key of a single cached response (spec §4.C, §4.H).
pub fn cache_entry_key(deployment_key_hash: &str, url: &str) -> String {
    format!("cache:{deployment_key_hash}:{}", hex::encode(Sha256::digest(url.as_bytes())))
}

/// Side-set tracking every cache-entry key stored under a deployment's
/// hash, so `invalidate` can purge them all without a `KEYS` scan.
pub fn cache_keys_set(deployment_key_hash: &str) -> String {
    format!("cachekeys:{deployment_key_hash}")
}

/// Hash holding the four rolling counters for one `(deployment, label)` pair.
pub fn metrics_key(deployment_key: &str, label: &str) -> String {
    format!("metrics:{deployment_key}:{label}")
}

/// The label a given client currently has installed, per deployment.
pub fn active_label_key(deployment_key: &str, client_unique_id: &str) -> String {
    format!("activelabel:{deployment_key}:{client_unique_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_entry_key_is_stable_for_the_same_url() {
        assert_eq!(
            cache_entry_key("abc", "https://example.com/updateCheck"),
            cache_entry_key("abc", "https://example.com/updateCheck")
        );
    }

    #[test]
    fn cache_entry_key_differs_by_url() {
        assert_ne!(
            cache_entry_key("abc", "https://example.com/a"),
            cache_entry_key("abc", "https://example.com/b")
        );
    }
}
