//! The release ingestor (spec §4.G): upload, promote, rollback, and patch
//! orchestration over the metadata, blob, and cache gateways.

pub mod differ;
pub mod pipeline;
pub mod release;

pub use differ::{CommandDiffer, Differ, NoopDiffer};
pub use pipeline::UploadPipeline;
pub use release::{
    PatchRequest, PromoteRequest, ReleaseIngestor, ReleaseOverrides, RollbackRequest, UploadRequest,
};
