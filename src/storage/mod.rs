//! Repositories for probe configuration, readings and alert records
//!
//! ## Backends
//!
//! - **SQLite** (feature `storage-sqlite`, default): embedded database
//! - **In-Memory**: no persistence, for tests or setups without a database
//!
//! ## Usage
//!
//! ```no_run
//! use probe_monitoring::storage::{Repository, sqlite::SqliteRepository};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let repo = SqliteRepository::new("./probes.db").await?;
//!     let probes = repo.list_probe_configs().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, Repository};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryRepository;
pub use schema::AlertRecord;
