//! Shared domain types for the skyport OTA delivery service.
//!
//! This crate holds data-only types and the closed error enum used across
//! every other `skyport-*` crate. Nothing here performs I/O.

pub mod app;
pub mod deployment;
pub mod email;
pub mod error;
pub mod history;
pub mod ids;
pub mod label;
pub mod metric_kind;
pub mod package;
pub mod update_check;
pub mod version_spec;

pub use app::{App, Collaborator, Permission};
pub use deployment::{Deployment, DeploymentKey};
pub use email::Email;
pub use error::StoreError;
pub use history::PackageHistory;
pub use ids::{AccountId, AppId, DeploymentId, PackageId};
pub use label::Label;
pub use metric_kind::{LabelMetrics, MetricKind};
pub use package::{DiffEntry, Package, ReleaseMethod};
pub use update_check::{UpdateCheckRequest, UpdateCheckCacheResponse, UpdateInfo};
pub use version_spec::AppVersionSpec;
