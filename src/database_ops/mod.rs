pub mod associations;
pub mod batch;
pub mod db;
pub mod error;
pub mod ingest_row;
pub mod memory_store;
pub mod models;
pub mod pg_store;
pub mod resolver;
pub mod search;
pub mod source;
pub mod store;
pub mod trending;

pub use batch::{BatchCoordinator, BatchOptions, BatchReport, DuplicatePolicy, Termination};
pub use db::Db;
pub use error::{IngestError, RecordError, StoreError};
pub use ingest_row::{RowIngestor, RowOutcome};
pub use memory_store::MemoryCatalogStore;
pub use pg_store::PgCatalogStore;
pub use store::{CatalogStore, CatalogTx};
