use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::PackageId;
use crate::label::Label;
use crate::version_spec::AppVersionSpec;

/// How a package entered a deployment's history (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReleaseMethod {
    Upload,
    Promote,
    Rollback,
}

/// A single entry in the diff package map: a prior package hash maps to a
/// smaller delta blob (spec §3, §4.G diff post-processing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub size: i64,
    pub blob_url: String,
}

/// A release snapshot committed to a deployment's history (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub label: Label,

    /// Raw client-facing string, preserved verbatim for echoing back.
    pub app_version_raw: String,
    #[serde(skip)]
    pub app_version: Option<AppVersionSpec>,

    pub blob_url: String,
    pub size: i64,
    pub package_hash: String,
    pub manifest_blob_url: Option<String>,

    pub is_disabled: bool,
    pub is_mandatory: bool,
    /// `None` or `Some(100)` both mean "fully released"; any `Some(n) < 100`
    /// marks the release as an unfinished rollout (spec §3, §4.E).
    pub rollout: Option<u8>,

    pub description: Option<String>,

    pub release_method: ReleaseMethod,
    pub original_label: Option<Label>,
    pub original_deployment: Option<String>,

    pub diff_package_map: Option<HashMap<String, DiffEntry>>,

    pub upload_time: DateTime<Utc>,
    pub released_by: String,
}

impl Package {
    /// Parses and caches `app_version_raw` into its typed form. Stores are
    /// expected to call this once after loading/constructing a `Package` so
    /// that `app_version()` never has to re-parse or panic.
    pub fn with_parsed_version(mut self) -> Result<Self, crate::error::StoreError> {
        self.app_version = Some(AppVersionSpec::parse(&self.app_version_raw)?);
        Ok(self)
    }

    pub fn app_version(&self) -> &AppVersionSpec {
        self.app_version
            .as_ref()
            .expect("Package::app_version_raw must be parsed via with_parsed_version before use")
    }

    /// spec §4.E: `isUnfinishedRollout(rollout) := rollout != null && rollout != 100`.
    pub fn is_unfinished_rollout(&self) -> bool {
        matches!(self.rollout, Some(r) if r != 100)
    }

    /// Effective rollout percentage for the selector: `None`/`Some(100)`
    /// both behave as "fully released", represented as 100 for the selector.
    pub fn effective_rollout(&self) -> u8 {
        self.rollout.unwrap_or(100)
    }
}
