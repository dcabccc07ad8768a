use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::label::Label;
use crate::package::Package;
use crate::version_spec::AppVersionSpec;

/// Maximum number of packages retained per deployment (spec §3 invariant 2).
pub const MAX_HISTORY_LEN: usize = 50;

/// A deployment's package history, ordered oldest -> newest, with the
/// invariants of spec §3 expressed as associated functions rather than
/// scattered across callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageHistory(pub Vec<Package>);

impl PackageHistory {
    pub fn new(packages: Vec<Package>) -> Self {
        Self(packages)
    }

    pub fn as_slice(&self) -> &[Package] {
        &self.0
    }

    pub fn head(&self) -> Option<&Package> {
        self.0.last()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates newest-first, the traversal order every reader in §4.F and
    /// §4.G needs.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &Package> {
        self.0.iter().rev()
    }

    /// The label the next committed package must carry (spec §8 invariant 1).
    pub fn next_label(&self) -> Label {
        match self.head() {
            Some(p) => p.label.next(),
            None => Label::first(),
        }
    }

    /// spec §3 invariant 3: a new release may not be committed while the
    /// head is both unfinished-rollout and not disabled.
    pub fn blocks_new_release(&self) -> bool {
        match self.head() {
            Some(head) => head.is_unfinished_rollout() && !head.is_disabled,
            None => false,
        }
    }

    /// spec §3 invariant 4 / §4.G step 5: the hash of the newest prior
    /// release sharing `app_version`'s "same version" identity — exact
    /// string match for exact versions, canonical-range equality otherwise.
    pub fn last_package_hash_with_same_app_version(&self, app_version: &AppVersionSpec) -> Option<String> {
        self.iter_newest_first()
            .find(|p| same_app_version(p.app_version(), app_version))
            .map(|p| p.package_hash.clone())
    }

    /// Appends `package`, enforcing the length cap by dropping the oldest
    /// entries (spec §3 invariant 2). Does not assign the label or check
    /// any other invariant — callers (the metadata store's `commit_package`)
    /// are responsible for those, since they require access to concurrency
    /// control this pure type doesn't have.
    pub fn push_capped(&mut self, package: Package) {
        self.0.push(package);
        if self.0.len() > MAX_HISTORY_LEN {
            let overflow = self.0.len() - MAX_HISTORY_LEN;
            self.0.drain(0..overflow);
        }
    }

    /// Validates invariants 1-3 without mutating, used by `commit_package`
    /// before it actually appends.
    pub fn validate_commit(&self, candidate_label: &Label) -> Result<(), StoreError> {
        if self.blocks_new_release() {
            return Err(StoreError::Conflict(
                "deployment head is an unfinished rollout; finish or disable it first".to_string(),
            ));
        }
        if *candidate_label != self.next_label() {
            return Err(StoreError::Conflict(format!(
                "expected next label {} but got {}",
                self.next_label(),
                candidate_label
            )));
        }
        Ok(())
    }

    /// Finds a package by label.
    pub fn find_by_label(&self, label: &Label) -> Option<&Package> {
        self.0.iter().find(|p| &p.label == label)
    }

    /// The second-newest entry, used as the default rollback target
    /// (spec §4.G Rollback path).
    pub fn second_newest(&self) -> Option<&Package> {
        self.iter_newest_first().nth(1)
    }
}

fn same_app_version(a: &AppVersionSpec, b: &AppVersionSpec) -> bool {
    a.canonical() == b.canonical()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PackageId;
    use crate::package::ReleaseMethod;
    use chrono::Utc;

    fn make_package(label: &str, app_version: &str, hash: &str, rollout: Option<u8>, disabled: bool) -> Package {
        Package {
            id: PackageId::new(),
            label: Label::parse(label).unwrap(),
            app_version_raw: app_version.to_string(),
            app_version: Some(AppVersionSpec::parse(app_version).unwrap()),
            blob_url: "blob://x".to_string(),
            size: 10,
            package_hash: hash.to_string(),
            manifest_blob_url: None,
            is_disabled: disabled,
            is_mandatory: false,
            rollout,
            description: None,
            release_method: ReleaseMethod::Upload,
            original_label: None,
            original_deployment: None,
            diff_package_map: None,
            upload_time: Utc::now(),
            released_by: "owner@example.com".to_string(),
        }
    }

    #[test]
    fn next_label_starts_at_v1() {
        let history = PackageHistory::default();
        assert_eq!(history.next_label().as_str(), "v1");
    }

    #[test]
    fn next_label_increments_from_head() {
        let history = PackageHistory::new(vec![make_package("v1", "1.0.0", "H1", None, false)]);
        assert_eq!(history.next_label().as_str(), "v2");
    }

    #[test]
    fn push_capped_drops_oldest_beyond_fifty() {
        let mut history = PackageHistory::default();
        for i in 1..=MAX_HISTORY_LEN + 5 {
            history.push_capped(make_package(&format!("v{i}"), "1.0.0", &format!("H{i}"), None, false));
        }
        assert_eq!(history.len(), MAX_HISTORY_LEN);
        assert_eq!(history.head().unwrap().label.as_str(), format!("v{}", MAX_HISTORY_LEN + 5));
        assert_eq!(history.0[0].label.as_str(), "v6");
    }

    #[test]
    fn blocks_new_release_while_unfinished_and_enabled() {
        let history = PackageHistory::new(vec![make_package("v1", "1.0.0", "H1", Some(20), false)]);
        assert!(history.blocks_new_release());
    }

    #[test]
    fn allows_new_release_when_unfinished_but_disabled() {
        let history = PackageHistory::new(vec![make_package("v1", "1.0.0", "H1", Some(20), true)]);
        assert!(!history.blocks_new_release());
    }

    #[test]
    fn duplicate_hash_detection_uses_same_app_version() {
        let history = PackageHistory::new(vec![
            make_package("v1", "1.0.0", "H1", None, false),
            make_package("v2", "2.0.0", "H2", None, false),
        ]);
        let same = AppVersionSpec::parse("1.0.0").unwrap();
        assert_eq!(
            history.last_package_hash_with_same_app_version(&same),
            Some("H1".to_string())
        );
    }
}
