//! The blob store gateway (spec §4.B): content-addressed storage for
//! release payloads, manifests, and diff bundles.

pub mod local_store;
pub mod s3_store;
pub mod store;

pub use local_store::LocalBlobStore;
pub use s3_store::S3BlobStore;
pub use store::BlobStore;
