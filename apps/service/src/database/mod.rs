/// Database abstraction layer
///
/// A repository-style seam over LibSQL: the core consumes plain
/// records and never runs SQL outside this module.
pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
