//! The metadata store gateway (spec §4.A): the source of truth for apps,
//! deployments, and package history. Every mutation that can race another
//! mutation on the same deployment goes through [`MetadataStore::commit_package`],
//! which serialises label assignment per-deployment (spec §5).

pub mod connection;
pub mod error;
pub mod fake_store;
pub mod migrations;
pub mod postgres_store;
pub mod store;

pub use connection::DatabaseConnection;
pub use error::map_sqlx_error;
pub use fake_store::FakeMetadataStore;
pub use migrations::MigrationManager;
pub use postgres_store::PostgresMetadataStore;
pub use store::{MetadataStore, PackagePatch};
